//! glados-say: speak text through the local voice without running the server.
//!
//! With a positional argument, speaks it once and exits. Otherwise reads lines
//! from stdin; with `--chat`, each line goes to the chat server first and the
//! reply is printed and spoken.

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use glados_tts::chat::{ChatCompletion, LlamaChatClient};
use glados_tts::config::Config;
use glados_tts::delivery::play_and_remove;
use glados_tts::error::TtsError;
use glados_tts::playback::{select_sink, AudioSink};
use glados_tts::synthesizer::Synthesizer;

#[derive(Parser, Debug)]
#[command(name = "glados-say", about = "Speak text with the GLaDOS voice")]
struct Args {
    /// Text to speak; omit for an interactive prompt
    text: Option<String>,

    /// Relay each input line through the chat server
    #[arg(long)]
    chat: bool,

    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

async fn say(
    synthesizer: &Synthesizer,
    sink: &dyn AudioSink,
    text: &str,
) -> Result<(), TtsError> {
    let copy = synthesizer.produce_ephemeral(text).await?;
    tokio::task::block_in_place(|| play_and_remove(sink, copy));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug,ort=info")
    } else {
        EnvFilter::new("warn,ort=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load(args.config.as_deref());
    let synthesizer = Synthesizer::start(&config).await?;
    let sink = select_sink(&config.playback);

    if let Some(text) = args.text {
        match say(&synthesizer, &*sink, &text).await {
            Ok(()) | Err(TtsError::EmptyInput) => {}
            Err(e) => return Err(e.into()),
        }
        return Ok(());
    }

    let chat = if args.chat {
        Some(LlamaChatClient::new(&config.chat)?)
    } else {
        None
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("Input: ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        let text = match &chat {
            Some(client) => match client.chat(&line).await {
                Ok(reply) => {
                    println!("llama : {reply}");
                    reply
                }
                Err(e) => {
                    warn!("{e}");
                    continue;
                }
            },
            None => line,
        };

        match say(&synthesizer, &*sink, &text).await {
            Ok(()) | Err(TtsError::EmptyInput) => {}
            Err(e) => warn!("{e}"),
        }
    }

    Ok(())
}
