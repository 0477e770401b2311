//! Local audio output.
//!
//! [`AudioSink`] hides how a WAV file reaches the speakers. Two variants:
//! in-process output through rodio, or handing the file to an external
//! player (`aplay`, `afplay`, ...). The variant is picked once at startup.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::process::Command;
use std::time::Instant;

use rodio::{Decoder, OutputStreamBuilder, Sink};
use tracing::{debug, info, warn};

use crate::config::{PlaybackBackend, PlaybackConfig};
use crate::error::TtsError;

pub trait AudioSink: Send + Sync {
    fn name(&self) -> &str;

    /// Play the file to completion. Blocking.
    fn play(&self, path: &Path) -> Result<(), TtsError>;
}

/// Plays through the default output device with rodio.
pub struct RodioSink;

impl RodioSink {
    /// Succeeds only if the default output device can be opened.
    pub fn probe() -> Result<Self, TtsError> {
        let mut stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| TtsError::Playback(format!("Failed to open audio output: {e}")))?;
        stream.log_on_drop(false);
        Ok(Self)
    }
}

impl AudioSink for RodioSink {
    fn name(&self) -> &str {
        "rodio"
    }

    fn play(&self, path: &Path) -> Result<(), TtsError> {
        // In rodio 0.21, OutputStream is the handle; it must outlive the sink
        let mut stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| TtsError::Playback(format!("Failed to open audio output: {e}")))?;
        stream.log_on_drop(false);

        let file = File::open(path)
            .map_err(|e| TtsError::Playback(format!("Failed to open {}: {e}", path.display())))?;
        let source = Decoder::new(BufReader::new(file))
            .map_err(|e| TtsError::Playback(format!("Failed to decode {}: {e}", path.display())))?;

        let sink = Sink::connect_new(stream.mixer());
        sink.append(source);
        sink.sleep_until_end();
        Ok(())
    }
}

/// Runs an external player with the file path as its last argument.
pub struct CommandSink {
    program: String,
    args: Vec<String>,
}

impl CommandSink {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// The usual command-line player for this platform.
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            Self::new("afplay", vec![])
        } else {
            Self::new("aplay", vec!["-q".into()])
        }
    }
}

impl AudioSink for CommandSink {
    fn name(&self) -> &str {
        &self.program
    }

    fn play(&self, path: &Path) -> Result<(), TtsError> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .status()
            .map_err(|e| TtsError::Playback(format!("Failed to run {}: {e}", self.program)))?;
        if status.success() {
            Ok(())
        } else {
            Err(TtsError::Playback(format!("{} exited with {status}", self.program)))
        }
    }
}

/// Pick the sink described by the config.
pub fn select_sink(config: &PlaybackConfig) -> Box<dyn AudioSink> {
    let command = || -> Box<dyn AudioSink> {
        if config.player.is_empty() {
            Box::new(CommandSink::platform_default())
        } else {
            Box::new(CommandSink::new(&config.player, config.player_args.clone()))
        }
    };

    let sink: Box<dyn AudioSink> = match config.backend {
        PlaybackBackend::Rodio => Box::new(RodioSink),
        PlaybackBackend::Command => command(),
        PlaybackBackend::Auto => match RodioSink::probe() {
            Ok(sink) => Box::new(sink),
            Err(e) => {
                warn!("{e}; falling back to external player");
                command()
            }
        },
    };
    info!("Audio sink: {}", sink.name());
    sink
}

/// Play and log how long it took. Errors are returned, not logged.
pub fn play_timed(sink: &dyn AudioSink, path: &Path) -> Result<(), TtsError> {
    let t0 = Instant::now();
    sink.play(path)?;
    debug!("Played {} in {}ms", path.display(), t0.elapsed().as_millis());
    Ok(())
}
