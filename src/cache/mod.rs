//! On-disk artifact cache.
//!
//! One flat directory holds two kinds of files:
//! - cached artifacts, named by [`normalize`](crate::normalizer::normalize),
//!   reused across requests and only ever removed by a sweep
//! - ephemeral artifacts (`GLaDOS-tts-tempfile<random>.wav`), owned by
//!   whichever delivery asked for them
//!
//! Writes land in an ephemeral file first and are renamed into place, so a
//! lookup never sees a half-written WAV.

pub mod eviction;

use std::fs::{self, File, FileTimes};
use std::io::{self, BufWriter};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::TtsError;
use crate::normalizer::ARTIFACT_EXTENSION;

pub use eviction::{CacheEntry, EvictionPolicy, KeepAll, MaxAge, MaxTotalBytes, PolicySet};

/// Sample rate of every stored artifact.
pub const SAMPLE_RATE: u32 = 22050;

/// Filename prefix of ephemeral artifacts and in-flight writes.
pub const EPHEMERAL_PREFIX: &str = "GLaDOS-tts-tempfile";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Lives under its cache key and is shared between requests.
    Cached,
    /// Randomly named, belongs to a single delivery.
    Ephemeral,
}

/// A stored audio file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    path: PathBuf,
    provenance: Provenance,
}

impl Artifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

pub struct ArtifactCache {
    dir: PathBuf,
}

impl ArtifactCache {
    /// Open the cache, creating its directory if it does not exist yet.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, TtsError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        info!("Artifact cache at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keys must be one plain file name; anything else could escape `dir`.
    fn path_for(&self, key: &str) -> Result<PathBuf, TtsError> {
        let mut components = Path::new(key).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => Ok(self.dir.join(name)),
            _ => Err(TtsError::InvalidKey(key.to_string())),
        }
    }

    /// Return the artifact stored under `key`, refreshing its access time.
    pub fn lookup(&self, key: &str) -> Option<Artifact> {
        let path = match self.path_for(key) {
            Ok(path) => path,
            Err(e) => {
                warn!("{e}");
                return None;
            }
        };
        if !path.is_file() {
            return None;
        }
        let artifact = Artifact {
            path,
            provenance: Provenance::Cached,
        };
        self.touch(&artifact);
        Some(artifact)
    }

    /// Mark the artifact as just used. Only metadata changes.
    pub fn touch(&self, artifact: &Artifact) {
        let now = SystemTime::now();
        let result = File::open(&artifact.path)
            .and_then(|f| f.set_times(FileTimes::new().set_accessed(now)));
        if let Err(e) = result {
            warn!("Failed to touch {}: {e}", artifact.path.display());
        }
    }

    /// Write 16-bit mono PCM as a WAV under `key` and return the artifact.
    pub fn store(&self, key: &str, samples: &[i16]) -> Result<Artifact, TtsError> {
        let path = self.path_for(key)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(EPHEMERAL_PREFIX)
            .suffix(ARTIFACT_EXTENSION)
            .tempfile_in(&self.dir)
            .map_err(|e| TtsError::storage(&path, e))?;

        write_wav(tmp.as_file_mut(), samples).map_err(|e| TtsError::storage(&path, e))?;
        // temp files start out 0600; artifacts are shared with players and sweepers
        make_shareable(tmp.as_file()).map_err(|e| TtsError::storage(&path, e))?;

        tmp.persist(&path)
            .map_err(|e| TtsError::storage(&path, e.error))?;

        debug!("Stored {} samples as {}", samples.len(), path.display());
        Ok(Artifact {
            path,
            provenance: Provenance::Cached,
        })
    }

    /// Copy an artifact to a fresh ephemeral file that the caller may delete.
    pub fn ephemeral_copy(&self, artifact: &Artifact) -> Result<Artifact, TtsError> {
        let (_file, path) = tempfile::Builder::new()
            .prefix(EPHEMERAL_PREFIX)
            .suffix(ARTIFACT_EXTENSION)
            .tempfile_in(&self.dir)
            .and_then(|tmp| tmp.keep().map_err(|e| e.error))
            .map_err(|e| TtsError::storage(&self.dir, e))?;

        if let Err(e) = fs::copy(&artifact.path, &path) {
            let _ = fs::remove_file(&path);
            if e.kind() == io::ErrorKind::NotFound {
                return Err(TtsError::ArtifactMissing(artifact.path.clone()));
            }
            return Err(TtsError::storage(path, e));
        }

        Ok(Artifact {
            path,
            provenance: Provenance::Ephemeral,
        })
    }

    /// List cached artifacts. Ephemeral files are not part of the cache.
    pub fn entries(&self) -> Result<Vec<CacheEntry>, TtsError> {
        let mut entries = Vec::new();
        for dirent in fs::read_dir(&self.dir)? {
            let dirent = dirent?;
            let name = dirent.file_name().to_string_lossy().to_string();
            if name.starts_with(EPHEMERAL_PREFIX) || !name.ends_with(ARTIFACT_EXTENSION) {
                continue;
            }
            let meta = match dirent.metadata() {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let accessed = meta
                .accessed()
                .or_else(|_| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            entries.push(CacheEntry {
                path: dirent.path(),
                size: meta.len(),
                accessed,
            });
        }
        Ok(entries)
    }

    /// Remove whatever `policy` selects. Returns the number of files removed.
    pub fn sweep(&self, policy: &dyn EvictionPolicy) -> Result<usize, TtsError> {
        let entries = self.entries()?;
        let victims = policy.select(&entries, SystemTime::now());
        let mut removed = 0;
        for path in victims {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to evict {}: {e}", path.display()),
            }
        }
        if removed > 0 {
            info!("Evicted {removed} of {} cached artifacts", entries.len());
        }
        Ok(removed)
    }
}

/// Run `policy` against the cache every `interval` until the task is aborted.
pub fn spawn_sweeper(
    cache: Arc<ArtifactCache>,
    policy: Arc<dyn EvictionPolicy>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let cache = cache.clone();
            let policy = policy.clone();
            match tokio::task::spawn_blocking(move || cache.sweep(&*policy)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("Cache sweep failed: {e}"),
                Err(e) => warn!("Cache sweep task died: {e}"),
            }
        }
    })
}

fn write_wav(file: &mut File, samples: &[i16]) -> io::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::new(BufWriter::new(file), spec).map_err(hound_to_io)?;
    for &sample in samples {
        writer.write_sample(sample).map_err(hound_to_io)?;
    }
    writer.finalize().map_err(hound_to_io)
}

#[cfg(unix)]
fn make_shareable(file: &File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn make_shareable(_file: &File) -> io::Result<()> {
    Ok(())
}

fn hound_to_io(e: hound::Error) -> io::Error {
    match e {
        hound::Error::IoError(e) => e,
        other => io::Error::other(other.to_string()),
    }
}
