//! Delivery of produced artifacts, followed by disposal.
//!
//! - [`stream_and_remove`]: lazy byte stream for a remote caller; the file is
//!   deleted once the stream finishes or is dropped early.
//! - [`play_and_remove`]: synchronous local playback, then deletion.
//!
//! Deletion is best-effort everywhere: failures are logged, never returned.

use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures_util::Stream;
use tokio_util::bytes::Bytes;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::cache::{Artifact, Provenance};
use crate::error::TtsError;
use crate::playback::{play_timed, AudioSink};

/// Delete an artifact. Returns whether the file was actually removed.
pub fn remove_artifact(path: &Path) -> bool {
    log_removal(path, fs::remove_file(path))
}

fn log_removal(path: &Path, result: io::Result<()>) -> bool {
    match result {
        Ok(()) => {
            debug!("Removed {}", path.display());
            true
        }
        Err(source) => {
            let err = TtsError::Deletion {
                path: path.to_path_buf(),
                source,
            };
            warn!("{err}");
            false
        }
    }
}

fn warn_if_cached(artifact: &Artifact) {
    if artifact.provenance() == Provenance::Cached {
        warn!(
            "Delivering cached artifact {} destructively; it will be removed from the cache",
            artifact.path().display()
        );
    }
}

type Removal = Pin<Box<dyn Future<Output = io::Result<()>> + Send>>;

enum Disposal {
    Streaming,
    Removing(Removal),
    Done,
}

/// Byte stream over an artifact that deletes the file when done.
///
/// The file is unlinked before the stream reports its end. If the consumer
/// drops the stream early, removal is handed to the blocking pool.
pub struct ArtifactStream {
    inner: ReaderStream<tokio::fs::File>,
    path: PathBuf,
    disposal: Disposal,
}

impl Stream for ArtifactStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match &mut this.disposal {
                Disposal::Streaming => match Pin::new(&mut this.inner).poll_next(cx) {
                    Poll::Ready(None) => {
                        let path = this.path.clone();
                        this.disposal =
                            Disposal::Removing(Box::pin(tokio::fs::remove_file(path)));
                    }
                    other => return other,
                },
                Disposal::Removing(removal) => {
                    let result = ready!(removal.as_mut().poll(cx));
                    log_removal(&this.path, result);
                    this.disposal = Disposal::Done;
                    return Poll::Ready(None);
                }
                Disposal::Done => return Poll::Ready(None),
            }
        }
    }
}

impl Drop for ArtifactStream {
    fn drop(&mut self) {
        // an in-flight removal keeps running on the blocking pool by itself
        if !matches!(self.disposal, Disposal::Streaming) {
            return;
        }
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_artifact(&path));
            }
            Err(_) => {
                remove_artifact(&path);
            }
        }
    }
}

/// Open the artifact for streaming. Opening happens now so a missing file is
/// reported before any response bytes go out.
pub async fn stream_and_remove(artifact: Artifact) -> Result<ArtifactStream, TtsError> {
    warn_if_cached(&artifact);
    let path = artifact.into_path();
    let file = tokio::fs::File::open(&path).await?;
    Ok(ArtifactStream {
        inner: ReaderStream::new(file),
        path,
        disposal: Disposal::Streaming,
    })
}

/// Play the artifact on `sink`, then delete it whatever the outcome. Blocking.
pub fn play_and_remove(sink: &dyn AudioSink, artifact: Artifact) {
    warn_if_cached(&artifact);
    if let Err(e) = play_timed(sink, artifact.path()) {
        warn!("{e}");
    }
    remove_artifact(artifact.path());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ArtifactCache;
    use crate::test_support::RecordingSink;
    use futures_util::StreamExt;
    use std::time::Duration;

    async fn wait_until_gone(path: &Path) {
        for _ in 0..100 {
            if !path.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{} was never removed", path.display());
    }

    fn ephemeral(cache: &ArtifactCache, samples: usize) -> Artifact {
        let stored = cache.store("source.wav", &vec![7i16; samples]).unwrap();
        cache.ephemeral_copy(&stored).unwrap()
    }

    #[test]
    fn test_remove_artifact_reports_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.wav");
        fs::write(&path, b"data").unwrap();

        assert!(remove_artifact(&path));
        assert!(!path.exists());
        assert!(!remove_artifact(&path));
    }

    #[tokio::test]
    async fn test_stream_emits_all_bytes_then_removes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(dir.path()).unwrap();
        let artifact = ephemeral(&cache, 50_000);
        let path = artifact.path().to_path_buf();
        let expected = fs::read(&path).unwrap();

        let mut stream = stream_and_remove(artifact).await.unwrap();
        let mut received = Vec::new();
        while let Some(chunk) = stream.next().await {
            received.extend_from_slice(&chunk.unwrap());
        }

        assert_eq!(received.len(), expected.len());
        assert_eq!(received, expected);
        assert!(!path.exists());
        // the cached original is untouched
        assert!(cache.lookup("source.wav").is_some());
    }

    #[tokio::test]
    async fn test_dropped_stream_still_removes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(dir.path()).unwrap();
        let artifact = ephemeral(&cache, 50_000);
        let path = artifact.path().to_path_buf();

        let mut stream = stream_and_remove(artifact).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert!(!first.is_empty());
        drop(stream);

        wait_until_gone(&path).await;
    }

    #[test]
    fn test_dropped_stream_outside_runtime_removes_inline() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(dir.path()).unwrap();
        let artifact = ephemeral(&cache, 1_000);
        let path = artifact.path().to_path_buf();

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let stream = runtime.block_on(stream_and_remove(artifact)).unwrap();
        drop(runtime);
        drop(stream);

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_cached_artifact_delivered_directly_is_consumed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(dir.path()).unwrap();
        let cached = cache.store("direct.wav", &[1; 100]).unwrap();
        assert_eq!(cached.provenance(), Provenance::Cached);

        let mut stream = stream_and_remove(cached).await.unwrap();
        while stream.next().await.is_some() {}

        // destructive on purpose: callers wanting to keep it copy first
        assert!(cache.lookup("direct.wav").is_none());
    }

    #[tokio::test]
    async fn test_stream_missing_file_fails_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(dir.path()).unwrap();
        let artifact = ephemeral(&cache, 10);
        fs::remove_file(artifact.path()).unwrap();

        assert!(stream_and_remove(artifact).await.is_err());
    }

    #[test]
    fn test_play_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(dir.path()).unwrap();
        let artifact = ephemeral(&cache, 10);
        let path = artifact.path().to_path_buf();
        let sink = RecordingSink::default();

        play_and_remove(&sink, artifact);

        assert_eq!(sink.played(), vec![path.clone()]);
        assert!(!path.exists());
    }

    #[test]
    fn test_play_failure_still_removes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(dir.path()).unwrap();
        let artifact = ephemeral(&cache, 10);
        let path = artifact.path().to_path_buf();

        play_and_remove(&RecordingSink::failing(), artifact);

        assert!(!path.exists());
    }
}
