//! ONNX voice engine: text → phonemes → phoneme IDs → VITS inference → f32 audio.
//!
//! Pipeline:
//! 1. Text → phonemes (misaki-rs G2P)
//! 2. Phonemes → IDs via the voice config's `phoneme_id_map`
//!    (`^` + each phoneme followed by `_` + `$`)
//! 3. IDs + lengths + scales → ONNX inference on the chosen device → audio (22.05kHz)

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider,
    DirectMLExecutionProvider, ExecutionProviderDispatch, TensorRTExecutionProvider,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use serde::Deserialize;
use tracing::{debug, info};

use super::{EngineLoader, SpeechEngine};
use crate::config::EngineConfig;
use crate::device::Device;
use crate::error::TtsError;

const BOS: char = '^';
const EOS: char = '$';
const PAD: char = '_';

/// The parts of a Piper-style voice config (`<voice>.onnx.json`) we use.
#[derive(Debug, Deserialize)]
struct VoiceConfig {
    phoneme_id_map: HashMap<String, Vec<i64>>,
    #[serde(default)]
    inference: InferenceDefaults,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct InferenceDefaults {
    noise_scale: f32,
    length_scale: f32,
    noise_w: f32,
}

impl Default for InferenceDefaults {
    fn default() -> Self {
        Self {
            noise_scale: 0.667,
            length_scale: 1.0,
            noise_w: 0.8,
        }
    }
}

/// Loads [`OnnxEngine`]s. The phoneme map is read once and shared.
pub struct OnnxEngineLoader {
    model_path: PathBuf,
    phoneme_ids: Arc<HashMap<char, Vec<i64>>>,
    scales: [f32; 3],
    intra_threads: usize,
}

impl OnnxEngineLoader {
    pub fn new(config: &EngineConfig) -> Result<Self, TtsError> {
        let base_dir = std::env::current_dir().unwrap_or_default();

        let model_path = if config.model_path.is_empty() {
            base_dir.join("models/glados.onnx")
        } else {
            PathBuf::from(&config.model_path)
        };
        let config_path = if config.config_path.is_empty() {
            let mut p = model_path.clone().into_os_string();
            p.push(".json");
            PathBuf::from(p)
        } else {
            PathBuf::from(&config.config_path)
        };

        info!("Loading voice config from {}", config_path.display());
        let voice = load_voice_config(&config_path)?;
        let phoneme_ids = phoneme_map(&voice.phoneme_id_map);
        info!("Voice config loaded: {} phonemes", phoneme_ids.len());

        let defaults = voice.inference;
        Ok(Self {
            model_path,
            phoneme_ids: Arc::new(phoneme_ids),
            scales: [
                config.noise_scale.unwrap_or(defaults.noise_scale),
                config.length_scale.unwrap_or(defaults.length_scale),
                config.noise_w.unwrap_or(defaults.noise_w),
            ],
            intra_threads: config.intra_threads,
        })
    }
}

impl EngineLoader for OnnxEngineLoader {
    fn load(&self, device: Device) -> Result<Box<dyn SpeechEngine>, TtsError> {
        let t0 = Instant::now();
        let fail = |reason: String| TtsError::DeviceLoad { device, reason };

        info!(
            "Loading ONNX model from {} on {device}",
            self.model_path.display()
        );
        let session = Session::builder()
            .map_err(|e| fail(format!("Failed to create ONNX session builder: {e}")))?
            .with_execution_providers([execution_provider(device)])
            .map_err(|e| fail(format!("Failed to register {device} execution provider: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| fail(format!("Failed to set optimization level: {e}")))?
            .with_intra_threads(self.intra_threads)
            .map_err(|e| fail(format!("Failed to set thread count: {e}")))?
            .commit_from_file(&self.model_path)
            .map_err(|e| fail(format!("Failed to load ONNX model: {e}")))?;

        let phonemizer = misaki_rs::G2P::new(misaki_rs::Language::EnglishUS);

        info!("ONNX model loaded on {device} in {}ms", t0.elapsed().as_millis());
        Ok(Box::new(OnnxEngine {
            session,
            phonemizer,
            phoneme_ids: self.phoneme_ids.clone(),
            scales: self.scales,
        }))
    }
}

/// Execution provider for a device. Registration errors are fatal for the
/// device rather than silently falling through to CPU.
fn execution_provider(device: Device) -> ExecutionProviderDispatch {
    match device {
        Device::TensorRt => TensorRTExecutionProvider::default().build().error_on_failure(),
        Device::Cuda => CUDAExecutionProvider::default().build().error_on_failure(),
        Device::DirectMl => DirectMLExecutionProvider::default().build().error_on_failure(),
        Device::CoreMl => CoreMLExecutionProvider::default().build().error_on_failure(),
        Device::Cpu => CPUExecutionProvider::default().build(),
    }
}

pub struct OnnxEngine {
    session: Session,
    phonemizer: misaki_rs::G2P,
    phoneme_ids: Arc<HashMap<char, Vec<i64>>>,
    scales: [f32; 3],
}

impl SpeechEngine for OnnxEngine {
    fn synthesize(&mut self, text: &str) -> Result<Vec<f32>, TtsError> {
        let t0 = Instant::now();

        // 1. Text → phonemes via misaki-rs G2P
        let (phonemes, _tokens) = self
            .phonemizer
            .g2p(text)
            .map_err(|e| TtsError::Synthesis(format!("Phonemization failed: {e}")))?;
        if phonemes.is_empty() {
            return Ok(Vec::new());
        }

        // 2. Phonemes → IDs
        let ids = encode_phonemes(&self.phoneme_ids, &phonemes);
        let n_ids = ids.len();

        // 3. Input tensors
        let input = ndarray::Array2::from_shape_vec((1, n_ids), ids)
            .map_err(|e| TtsError::Synthesis(format!("Failed to create input tensor: {e}")))?;
        let input_tensor = Tensor::from_array(input)
            .map_err(|e| TtsError::Synthesis(format!("Failed to create input ort tensor: {e}")))?;

        let lengths_tensor = Tensor::from_array(ndarray::Array1::from_vec(vec![n_ids as i64]))
            .map_err(|e| TtsError::Synthesis(format!("Failed to create lengths ort tensor: {e}")))?;

        let scales_tensor = Tensor::from_array(ndarray::Array1::from_vec(self.scales.to_vec()))
            .map_err(|e| TtsError::Synthesis(format!("Failed to create scales ort tensor: {e}")))?;

        // 4. Inference
        let outputs = self
            .session
            .run(ort::inputs![
                "input" => input_tensor,
                "input_lengths" => lengths_tensor,
                "scales" => scales_tensor
            ])
            .map_err(|e| TtsError::Synthesis(format!("ONNX inference failed: {e}")))?;

        // 5. Output is (1, 1, 1, samples); flattening squeezes it to mono
        let first_output = outputs
            .iter()
            .next()
            .ok_or_else(|| TtsError::Synthesis("No output tensor from model".into()))?;
        let (_shape, audio) = first_output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| TtsError::Synthesis(format!("Failed to extract audio tensor: {e}")))?;

        let samples: Vec<f32> = audio.to_vec();
        debug!(
            "Generated {} samples from {n_ids} phoneme ids in {}ms",
            samples.len(),
            t0.elapsed().as_millis()
        );
        Ok(samples)
    }
}

/// `^ _ p1 _ p2 _ ... $`. Phonemes missing from the map are skipped.
fn encode_phonemes(map: &HashMap<char, Vec<i64>>, phonemes: &str) -> Vec<i64> {
    let pad = ids_for(map, PAD);

    let mut ids: Vec<i64> = Vec::with_capacity(phonemes.len() * 2 + 2);
    ids.extend_from_slice(ids_for(map, BOS));
    ids.extend_from_slice(pad);
    for ch in phonemes.chars() {
        if let Some(id) = map.get(&ch) {
            ids.extend_from_slice(id);
            ids.extend_from_slice(pad);
        }
    }
    ids.extend_from_slice(ids_for(map, EOS));
    ids
}

fn ids_for(map: &HashMap<char, Vec<i64>>, ch: char) -> &[i64] {
    map.get(&ch).map(Vec::as_slice).unwrap_or(&[])
}

fn load_voice_config(path: &Path) -> Result<VoiceConfig, TtsError> {
    let contents = fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| TtsError::Synthesis(format!("Failed to parse voice config: {e}")))
}

/// Keep single-character phonemes; the G2P output is matched per char.
fn phoneme_map(raw: &HashMap<String, Vec<i64>>) -> HashMap<char, Vec<i64>> {
    raw.iter()
        .filter_map(|(phoneme, ids)| {
            let mut chars = phoneme.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) => Some((ch, ids.clone())),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_config_parsing() {
        let json = r#"{
            "audio": {"sample_rate": 22050},
            "phoneme_id_map": {"_": [0], "^": [1], "$": [2], "a": [14], "ab": [99]},
            "inference": {"noise_scale": 0.5}
        }"#;
        let voice: VoiceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(voice.inference.noise_scale, 0.5);
        assert_eq!(voice.inference.length_scale, 1.0);

        let map = phoneme_map(&voice.phoneme_id_map);
        assert_eq!(map.get(&'a'), Some(&vec![14]));
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn test_encode_phonemes() {
        let map: HashMap<char, Vec<i64>> = [('_', vec![0]), ('^', vec![1]), ('$', vec![2]), ('h', vec![20]), ('i', vec![21])]
            .into_iter()
            .collect();
        assert_eq!(encode_phonemes(&map, "hi"), vec![1, 0, 20, 0, 21, 0, 2]);
        assert_eq!(encode_phonemes(&map, "h?"), vec![1, 0, 20, 0, 2]);
    }

    #[test]
    fn test_voice_config_without_inference_section() {
        let voice: VoiceConfig = serde_json::from_str(r#"{"phoneme_id_map": {}}"#).unwrap();
        assert_eq!(voice.inference.noise_w, 0.8);
    }
}
