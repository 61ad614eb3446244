//! Command-line arguments and configuration resolution.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cadenza_core::EngineConfig;
use clap::{Parser, Subcommand};
use tracing::debug;

#[derive(Debug, Parser)]
#[command(name = "cadenza", version, about = "Play songs from a catalog")]
pub struct Cli {
    /// Engine config file (TOML). Defaults to the per-user config if present.
    #[arg(long, env = "CADENZA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Song catalog (JSON array of songs).
    #[arg(long, env = "CADENZA_CATALOG", default_value = "songs.json")]
    pub catalog: PathBuf,

    /// Directory catalog paths are relative to; overrides config and SONGS_PATH.
    #[arg(long)]
    pub songs_root: Option<PathBuf>,

    /// Play through a silent clock-paced sink instead of the audio device.
    #[arg(long)]
    pub null_output: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the songs in the catalog.
    List,
    /// Play a song, then any queued songs, until playback ends.
    Play {
        name: String,
        /// Songs to queue after the first one.
        #[arg(long = "then", value_name = "NAME")]
        then: Vec<String>,
    },
    /// Remove a song from the catalog.
    Delete { name: String },
    /// List audio output devices.
    Devices,
}

impl Cli {
    /// Build the engine config: file, then `SONGS_PATH`, then `--songs-root`.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let path = self
            .config
            .clone()
            .or_else(|| EngineConfig::default_path().filter(|p| p.exists()));

        let config = match path {
            Some(path) => load_config(&path)?,
            None => EngineConfig::default(),
        };

        let mut config = config.with_env_overrides();
        if let Some(root) = &self.songs_root {
            config.songs_root.clone_from(root);
        }
        Ok(config)
    }
}

fn load_config(path: &Path) -> Result<EngineConfig> {
    debug!("Reading config {}", path.display());
    EngineConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))
}
