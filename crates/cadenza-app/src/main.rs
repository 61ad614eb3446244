//! # Cadenza
//!
//! Command-line player for a song catalog.

mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cadenza_audio::{output, ClockSink, PcmSpec, PlaybackEngine, PlaybackState, SessionEvent};
use cadenza_core::Catalog;
use clap::Parser;
use cli::{Cli, Command};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Device latency modelled by the null output.
const NULL_OUTPUT_LATENCY: Duration = Duration::from_millis(200);

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadenza=info,cadenza_audio=info,cadenza_core=info".into()),
        )
        .init();

    let cli = Cli::parse();
    info!("Starting Cadenza v{}", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Command::Devices => {
            for name in output::list_output_devices()? {
                println!("{name}");
            }
            Ok(())
        }
        Command::List => {
            for song in load_catalog(&cli)?.snapshot() {
                println!("{}\t{}\t{}", song.name, song.artist, song.genre);
            }
            Ok(())
        }
        Command::Play { name, then } => {
            let engine = open_engine(&cli, cli.null_output)?;
            play(&engine, name, then)
        }
        Command::Delete { name } => {
            // Nothing plays in this process, so no device is needed.
            let engine = open_engine(&cli, true)?;
            let song = engine.delete_song(name)?;
            println!("Deleted {}", song.display_name());
            Ok(())
        }
    }
}

fn load_catalog(cli: &Cli) -> Result<Catalog> {
    let catalog = Catalog::load(&cli.catalog)
        .with_context(|| format!("Failed to load catalog {}", cli.catalog.display()))?;
    info!("Loaded {} songs from {}", catalog.len(), cli.catalog.display());
    Ok(catalog)
}

fn open_engine(cli: &Cli, null_output: bool) -> Result<PlaybackEngine> {
    let config = cli.engine_config()?;
    let catalog = Arc::new(load_catalog(cli)?);

    let engine = if null_output {
        let format = PcmSpec::new(config.sample_rate, config.channels);
        PlaybackEngine::with_sink(config, catalog, move || {
            Ok(ClockSink::new(format, NULL_OUTPUT_LATENCY))
        })?
    } else {
        PlaybackEngine::new(config, catalog).context("Failed to start audio output")?
    };
    Ok(engine)
}

/// Play `name` and the `then` songs in order, returning once playback ends.
///
/// The caller drops the engine afterwards, which waits for the sink to play
/// out the end of the last song.
fn play(engine: &PlaybackEngine, name: &str, then: &[String]) -> Result<()> {
    engine.play_song(name)?;
    for next in then {
        engine.enqueue_song(next)?;
    }

    loop {
        let Some(event) = engine.recv_event_timeout(Duration::from_millis(250)) else {
            if engine.state() == PlaybackState::Idle {
                return Ok(());
            }
            continue;
        };

        match event {
            SessionEvent::TrackStarted(song) => info!("Now playing: {}", song.display_name()),
            SessionEvent::TrackFinished(song) => info!("Finished: {}", song.display_name()),
            SessionEvent::QueueAdvanced { remaining } => info!("{remaining} songs left in queue"),
            SessionEvent::Error(message) => warn!("{message}"),
            SessionEvent::StateChanged(PlaybackState::Idle) => return Ok(()),
            SessionEvent::StateChanged(PlaybackState::Error) => {
                let message = engine.status().last_error.unwrap_or_default();
                bail!("Playback failed: {message}");
            }
            SessionEvent::StateChanged(_) => {}
        }
    }
}
