//! Compute device selection for the speech engine.
//!
//! Candidates are tried in preference order. A candidate counts as usable
//! only once the engine has loaded on it *and* survived warm-up, since a
//! runtime can report an accelerator that then fails at first use. Failed
//! accelerators are dropped; a failure on the CPU fallback is fatal.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::{EngineLoader, SpeechEngine};
use crate::error::TtsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    TensorRt,
    Cuda,
    DirectMl,
    CoreMl,
    Cpu,
}

impl Device {
    /// The device that is never dropped from the candidate list.
    pub const FALLBACK: Device = Device::Cpu;

    pub fn is_fallback(self) -> bool {
        self == Self::FALLBACK
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TensorRt => "tensorrt",
            Self::Cuda => "cuda",
            Self::DirectMl => "directml",
            Self::CoreMl => "coreml",
            Self::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tensorrt" | "trt" => Ok(Self::TensorRt),
            "cuda" | "gpu" => Ok(Self::Cuda),
            "directml" | "dml" => Ok(Self::DirectMl),
            "coreml" => Ok(Self::CoreMl),
            "cpu" => Ok(Self::Cpu),
            other => Err(format!("unknown device: {other}")),
        }
    }
}

/// An engine that loaded and warmed up on `device`.
pub struct ReadyEngine {
    pub device: Device,
    pub engine: Box<dyn SpeechEngine>,
}

impl fmt::Debug for ReadyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyEngine")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

pub struct DeviceSelector {
    candidates: Vec<Device>,
    warmup_inputs: Vec<String>,
}

impl DeviceSelector {
    /// Duplicates are ignored and the fallback is appended if missing.
    pub fn new(preferred: &[Device], warmup_inputs: Vec<String>) -> Self {
        let mut candidates: Vec<Device> = Vec::with_capacity(preferred.len() + 1);
        for &device in preferred {
            if !candidates.contains(&device) {
                candidates.push(device);
            }
        }
        if !candidates.contains(&Device::FALLBACK) {
            candidates.push(Device::FALLBACK);
        }
        Self {
            candidates,
            warmup_inputs,
        }
    }

    pub fn candidates(&self) -> &[Device] {
        &self.candidates
    }

    /// Walk the candidates until one loads and warms up. Blocking.
    pub fn select(mut self, loader: &dyn EngineLoader) -> Result<ReadyEngine, TtsError> {
        while let Some(&device) = self.candidates.first() {
            info!("Trying speech engine on {device}");
            match self.try_device(loader, device) {
                Ok(engine) => {
                    info!("Device selected: {device}");
                    return Ok(ReadyEngine { device, engine });
                }
                Err(e) if device.is_fallback() => {
                    return Err(TtsError::NoDeviceAvailable {
                        last_error: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!("{e}");
                    self.candidates.remove(0);
                }
            }
        }
        Err(TtsError::NoDeviceAvailable {
            last_error: "candidate list exhausted".into(),
        })
    }

    fn try_device(
        &self,
        loader: &dyn EngineLoader,
        device: Device,
    ) -> Result<Box<dyn SpeechEngine>, TtsError> {
        let t0 = Instant::now();
        let mut engine = loader.load(device).map_err(|e| match e {
            TtsError::DeviceLoad { .. } => e,
            other => TtsError::DeviceLoad {
                device,
                reason: other.to_string(),
            },
        })?;

        for input in &self.warmup_inputs {
            engine
                .synthesize(input)
                .map_err(|e| TtsError::DeviceLoad {
                    device,
                    reason: format!("warm-up failed: {e}"),
                })?;
        }

        info!(
            "Engine ready on {device} in {}ms ({} warm-up runs)",
            t0.elapsed().as_millis(),
            self.warmup_inputs.len()
        );
        Ok(engine)
    }
}

/// Default warm-up inputs.
pub fn default_warmup_inputs() -> Vec<String> {
    (0..4).map(|i| i.to_string()).collect()
}
