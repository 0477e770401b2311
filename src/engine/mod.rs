//! Speech engine seam.
//!
//! The pipeline only needs `text → f32 samples`. [`EngineLoader`] builds an
//! engine for a specific device, which is where load-time failures surface;
//! [`onnx`] provides the shipped implementation.

pub mod onnx;

use crate::device::Device;
use crate::error::TtsError;

pub use onnx::{OnnxEngine, OnnxEngineLoader};

/// A loaded synthesis engine bound to one device.
pub trait SpeechEngine: Send {
    /// Synthesize `text` into mono f32 samples in `[-1.0, 1.0]`.
    fn synthesize(&mut self, text: &str) -> Result<Vec<f32>, TtsError>;
}

/// Loads an engine onto a device. Failure means the device is unusable.
pub trait EngineLoader: Send + Sync {
    fn load(&self, device: Device) -> Result<Box<dyn SpeechEngine>, TtsError>;
}

/// Scale f32 samples to 16-bit PCM, clipping to the representable range.
pub fn to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}
