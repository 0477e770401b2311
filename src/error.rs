//! Error type shared by the synthesis pipeline.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::device::Device;

#[derive(Debug, Error)]
pub enum TtsError {
    /// Input text was empty or whitespace only. Callers treat this as a no-op.
    #[error("input text is empty")]
    EmptyInput,

    #[error("failed to load engine on {device}: {reason}")]
    DeviceLoad { device: Device, reason: String },

    /// Even the universal fallback device failed. Nothing can be synthesized.
    #[error("no device could run the speech engine (last error: {last_error})")]
    NoDeviceAvailable { last_error: String },

    #[error("failed to write artifact {}: {source}", path.display())]
    StorageWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A cache key that is not a single file name inside the cache directory.
    #[error("invalid cache key {0:?}")]
    InvalidKey(String),

    /// The artifact disappeared before it could be copied, e.g. evicted.
    #[error("artifact {} is gone", .0.display())]
    ArtifactMissing(PathBuf),

    #[error("failed to delete artifact {}: {source}", path.display())]
    Deletion {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("playback failed: {0}")]
    Playback(String),

    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("speech engine is unavailable")]
    EngineUnavailable,

    #[error("chat request failed: {0}")]
    Chat(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TtsError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::StorageWrite {
            path: path.into(),
            source,
        }
    }
}
