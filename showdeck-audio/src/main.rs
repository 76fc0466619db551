//! ShowDeck audio console - main entry point
//!
//! Loads configuration, establishes verified output, then plays whatever
//! was requested on the command line until Ctrl+C.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use showdeck_audio::{AudioEngine, CuePriority, EngineConfig, EngineEvent};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for showdeck-audio
#[derive(Parser, Debug)]
#[command(name = "showdeck-audio")]
#[command(about = "Audio playback engine for the ShowDeck host console")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "SHOWDECK_CONFIG")]
    config: Option<PathBuf>,

    /// Output device name (overrides the configured device)
    #[arg(short, long)]
    device: Option<String>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Background music file, looped
    #[arg(long)]
    music: Option<PathBuf>,

    /// Cue file to queue (repeatable, played in order)
    #[arg(long)]
    cue: Vec<PathBuf>,

    /// Effect file to fire once output is up (repeatable)
    #[arg(long)]
    effect: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = EngineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("showdeck_audio={0},showdeck_common={0}", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ShowDeck audio engine v{}", env!("CARGO_PKG_VERSION"));

    let engine = AudioEngine::with_default_backends(config).context("Failed to create audio engine")?;

    if args.list_devices {
        for device in engine.list_devices().context("Failed to enumerate devices")? {
            let marker = if device.is_default { " (default)" } else { "" };
            println!("{}{}", device.name, marker);
        }
        engine.shutdown();
        return Ok(());
    }

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!("Event log lagged, {} events skipped", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let session = engine
        .initialize(args.device.clone())
        .await
        .context("No audio output available")?;
    info!("Output ready: {}", session);

    if let Some(music) = &args.music {
        if let Err(e) = engine.music().play_music(music, true) {
            error!("Failed to start music {}: {}", music.display(), e);
        }
    }

    for cue in &args.cue {
        engine.queue_audio(cue, CuePriority::Normal);
    }

    for effect in &args.effect {
        if let Err(e) = engine.effects().play_effect(effect, None) {
            error!("Failed to play effect {}: {}", effect.display(), e);
        }
    }

    signal::ctrl_c().await.context("Failed to install Ctrl+C handler")?;
    info!("Received Ctrl+C, shutting down");

    engine.shutdown();
    info!("Shutdown complete");
    Ok(())
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::OutputLost { .. } | EngineEvent::StallDetected { .. } | EngineEvent::CueRejected { .. } => {
            warn!("{:?}", event)
        }
        _ => info!("{:?}", event),
    }
}
