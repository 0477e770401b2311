//! Fakes shared by unit tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::chat::ChatCompletion;
use crate::device::Device;
use crate::engine::{EngineLoader, SpeechEngine};
use crate::error::TtsError;
use crate::playback::AudioSink;

/// Engine returning fixed samples and counting calls across clones.
#[derive(Clone)]
pub struct CountingEngine {
    samples: Option<Vec<f32>>,
    pub calls: Arc<AtomicUsize>,
}

impl CountingEngine {
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples: Some(samples),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            samples: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl SpeechEngine for CountingEngine {
    fn synthesize(&mut self, _text: &str) -> Result<Vec<f32>, TtsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.samples
            .clone()
            .ok_or_else(|| TtsError::Synthesis("engine exploded".into()))
    }
}

/// Loader handing out clones of one engine, failing on chosen devices.
pub struct StaticLoader {
    engine: CountingEngine,
    failing: Vec<Device>,
}

impl StaticLoader {
    pub fn new(engine: CountingEngine) -> Self {
        Self {
            engine,
            failing: Vec::new(),
        }
    }

    pub fn failing_on(mut self, device: Device) -> Self {
        self.failing.push(device);
        self
    }
}

impl EngineLoader for StaticLoader {
    fn load(&self, device: Device) -> Result<Box<dyn SpeechEngine>, TtsError> {
        if self.failing.contains(&device) {
            return Err(TtsError::Synthesis(format!("{device} unavailable")));
        }
        Ok(Box::new(self.engine.clone()))
    }
}

/// Sink that records what it was asked to play.
#[derive(Default)]
pub struct RecordingSink {
    played: Mutex<Vec<PathBuf>>,
    fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            played: Mutex::default(),
            fail: true,
        }
    }

    pub fn played(&self) -> Vec<PathBuf> {
        self.played.lock().unwrap().clone()
    }
}

impl AudioSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn play(&self, path: &Path) -> Result<(), TtsError> {
        assert!(path.exists(), "asked to play a missing file");
        self.played.lock().unwrap().push(path.to_path_buf());
        if self.fail {
            Err(TtsError::Playback("no speakers".into()))
        } else {
            Ok(())
        }
    }
}

/// Chat client with a canned reply.
pub struct FixedChat(Option<String>);

impl FixedChat {
    pub fn reply(text: &str) -> Self {
        Self(Some(text.to_string()))
    }

    pub fn failing() -> Self {
        Self(None)
    }
}

#[async_trait]
impl ChatCompletion for FixedChat {
    async fn chat(&self, _message: &str) -> Result<String, TtsError> {
        self.0
            .clone()
            .ok_or_else(|| TtsError::Chat("Cannot connect to chat server".into()))
    }
}
