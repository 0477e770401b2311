//! Synthesis orchestrator: text → cached WAV artifact.
//!
//! Cache hits are served without touching the engine. Misses go through a
//! single mutex around the engine and run on the blocking pool, so at most
//! one synthesis uses the device at a time.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, info};

use crate::cache::{Artifact, ArtifactCache};
use crate::config::Config;
use crate::device::{Device, DeviceSelector, ReadyEngine};
use crate::engine::{to_pcm16, EngineLoader, OnnxEngineLoader, SpeechEngine};
use crate::error::TtsError;
use crate::normalizer::normalize;

pub struct Synthesizer {
    cache: Arc<ArtifactCache>,
    engine: Arc<Mutex<Box<dyn SpeechEngine>>>,
    device: Device,
}

impl Synthesizer {
    pub fn new(cache: Arc<ArtifactCache>, ready: ReadyEngine) -> Self {
        Self {
            cache,
            engine: Arc::new(Mutex::new(ready.engine)),
            device: ready.device,
        }
    }

    /// Open the cache, load the ONNX engine and pick a device.
    ///
    /// Fails with [`TtsError::NoDeviceAvailable`] when not even the CPU
    /// fallback works; callers should exit on that.
    pub async fn start(config: &Config) -> Result<Self, TtsError> {
        let cache = Arc::new(ArtifactCache::open(&config.cache.dir)?);
        let loader = OnnxEngineLoader::new(&config.engine)?;
        Self::start_with_loader(cache, loader, config).await
    }

    pub async fn start_with_loader<L>(
        cache: Arc<ArtifactCache>,
        loader: L,
        config: &Config,
    ) -> Result<Self, TtsError>
    where
        L: EngineLoader + 'static,
    {
        let selector = DeviceSelector::new(
            &config.engine.devices,
            config.engine.warmup_inputs.clone(),
        );
        let ready = tokio::task::spawn_blocking(move || selector.select(&loader))
            .await
            .map_err(|_| TtsError::EngineUnavailable)??;
        Ok(Self::new(cache, ready))
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    /// Return the artifact for `text`, synthesizing it on a cache miss.
    pub async fn produce(&self, text: &str) -> Result<Artifact, TtsError> {
        if text.trim().is_empty() {
            return Err(TtsError::EmptyInput);
        }

        let key = normalize(text);
        if let Some(artifact) = self.cache.lookup(&key) {
            info!("Cache hit: {key}");
            return Ok(artifact);
        }

        let cache = self.cache.clone();
        let engine = self.engine.clone();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || {
            let mut engine = engine.lock().map_err(|_| TtsError::EngineUnavailable)?;

            // another request may have produced it while we waited
            if let Some(artifact) = cache.lookup(&key) {
                debug!("Cache filled while waiting for engine: {key}");
                return Ok(artifact);
            }

            let t0 = Instant::now();
            let samples = engine.synthesize(&text)?;
            info!(
                "Synthesized {key}: {} samples in {}ms",
                samples.len(),
                t0.elapsed().as_millis()
            );

            cache.store(&key, &to_pcm16(&samples))
        })
        .await
        .map_err(|_| TtsError::EngineUnavailable)?
    }

    /// Produce `text` and return a private copy that delivery may delete.
    pub async fn produce_ephemeral(&self, text: &str) -> Result<Artifact, TtsError> {
        let artifact = self.produce(text).await?;
        self.copy_for_delivery(text, &artifact).await
    }

    /// A sweep can evict `artifact` after `produce` returned it; in that case
    /// produce it once more.
    async fn copy_for_delivery(&self, text: &str, artifact: &Artifact) -> Result<Artifact, TtsError> {
        match self.cache.ephemeral_copy(artifact) {
            Err(TtsError::ArtifactMissing(path)) => {
                debug!("{} evicted before delivery, producing again", path.display());
                let artifact = self.produce(text).await?;
                self.cache.ephemeral_copy(&artifact)
            }
            other => other,
        }
    }
}
