//! glados-tts-rs: caching speech synthesis server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use glados_tts::api::{self, AppState};
use glados_tts::cache::spawn_sweeper;
use glados_tts::chat::LlamaChatClient;
use glados_tts::config::Config;
use glados_tts::playback::select_sink;
use glados_tts::synthesizer::Synthesizer;

#[derive(Parser, Debug)]
#[command(name = "glados-tts-rs", about = "Caching speech synthesis server")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Suppress noisy ort internals
    let filter = if args.verbose {
        EnvFilter::new("debug,ort=info")
    } else {
        EnvFilter::new("info,ort=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("glados-tts-rs starting");

    let mut config = Config::load(args.config.as_deref());
    if let Some(port) = args.port {
        config.server.port = port;
    }

    info!("Loading voice model...");
    let synthesizer = match Synthesizer::start(&config).await {
        Ok(synthesizer) => Arc::new(synthesizer),
        Err(e) => {
            error!("{e}");
            return Err(e.into());
        }
    };
    info!("Voice model ready on {}", synthesizer.device());

    if let Some(policy) = config.cache.eviction_policy() {
        info!(
            "Cache eviction every {}s",
            config.cache.sweep_interval().as_secs()
        );
        spawn_sweeper(synthesizer.cache().clone(), policy, config.cache.sweep_interval());
    }

    let state = AppState {
        synthesizer,
        sink: Arc::from(select_sink(&config.playback)),
        chat: Arc::new(LlamaChatClient::new(&config.chat)?),
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    api::serve(state, addr).await?;

    Ok(())
}
