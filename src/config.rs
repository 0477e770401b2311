//! Configuration management for glados-tts-rs.
//!
//! Loads config from YAML files in standard locations. Every section and
//! field is optional; anything missing falls back to its default.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::cache::{EvictionPolicy, MaxAge, MaxTotalBytes, PolicySet};
use crate::device::{default_warmup_inputs, Device};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// ONNX voice model. Empty means `./models/glados.onnx`.
    pub model_path: String,
    /// Voice config JSON. Empty means `<model_path>.json`.
    pub config_path: String,
    /// Devices in order of preference. `cpu` is always tried last if absent.
    pub devices: Vec<Device>,
    pub warmup_inputs: Vec<String>,
    pub noise_scale: Option<f32>,
    pub length_scale: Option<f32>,
    pub noise_w: Option<f32>,
    pub intra_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_path: String::new(),
            config_path: String::new(),
            devices: vec![Device::Cuda, Device::Cpu],
            warmup_inputs: default_warmup_inputs(),
            noise_scale: None,
            length_scale: None,
            noise_w: None,
            intra_threads: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: String,
    /// Evict artifacts not accessed for this long.
    pub max_age_secs: Option<u64>,
    /// Evict least recently accessed artifacts beyond this total size.
    pub max_total_bytes: Option<u64>,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: "audio".into(),
            max_age_secs: None,
            max_total_bytes: None,
            sweep_interval_secs: 3600,
        }
    }
}

impl CacheConfig {
    /// `None` when no eviction limit is configured.
    pub fn eviction_policy(&self) -> Option<Arc<dyn EvictionPolicy>> {
        let mut policies: Vec<Box<dyn EvictionPolicy>> = Vec::new();
        if let Some(secs) = self.max_age_secs {
            policies.push(Box::new(MaxAge(Duration::from_secs(secs))));
        }
        if let Some(bytes) = self.max_total_bytes {
            policies.push(Box::new(MaxTotalBytes(bytes)));
        }
        if policies.is_empty() {
            None
        } else {
            Some(Arc::new(PolicySet(policies)))
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8124,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackBackend {
    /// In-process output if a device opens, otherwise the external player.
    Auto,
    Rodio,
    Command,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub backend: PlaybackBackend,
    /// External player program. Empty picks the platform default.
    pub player: String,
    pub player_args: Vec<String>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            backend: PlaybackBackend::Auto,
            player: String::new(),
            player_args: vec![],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub system_prompt: String,
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".into(),
            api_key: "sk-no-key-required".into(),
            model: "LLaMA_CPP".into(),
            system_prompt: "You are EvilLyn, a good friend. You are very kind, helpful, \
                            and trying to be a pleasant friend. You also make nerdy jokes"
                .into(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
    pub playback: PlaybackConfig,
    pub chat: ChatConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/glados-tts/config.yaml
    /// 3. /etc/glados-tts/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/glados-tts/config.yaml")),
                Some(PathBuf::from("/etc/glados-tts/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match serde_yml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8124);
        assert_eq!(config.cache.dir, "audio");
        assert_eq!(config.engine.devices, vec![Device::Cuda, Device::Cpu]);
        assert_eq!(config.engine.warmup_inputs, vec!["0", "1", "2", "3"]);
        assert!(config.cache.eviction_policy().is_none());
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
engine:
  devices: [tensorrt, cuda]
cache:
  dir: /var/cache/glados
  max_age_secs: 86400
playback:
  backend: command
  player: paplay
"#;
        let config: Config = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.engine.devices, vec![Device::TensorRt, Device::Cuda]);
        assert_eq!(config.engine.intra_threads, 4);
        assert_eq!(config.cache.dir, "/var/cache/glados");
        assert!(config.cache.eviction_policy().is_some());
        assert_eq!(config.playback.backend, PlaybackBackend::Command);
        assert_eq!(config.playback.player, "paplay");
        assert_eq!(config.server.port, 8124);
        assert_eq!(config.chat.model, "LLaMA_CPP");
    }

    #[test]
    fn test_platform_accelerators_parse() {
        let config: Config = serde_yml::from_str("engine:\n  devices: [coreml, directml, cpu]\n").unwrap();
        assert_eq!(
            config.engine.devices,
            vec![Device::CoreMl, Device::DirectMl, Device::Cpu]
        );
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("missing.yaml")));
        assert_eq!(config.server.port, 8124);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "server:\n  port: 9000\n").unwrap();
        let config = Config::load(Some(&path));
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
    }
}
