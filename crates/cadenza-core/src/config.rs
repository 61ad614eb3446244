//! Playback engine configuration.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Environment variable that overrides the songs root.
pub const SONGS_PATH_ENV: &str = "SONGS_PATH";

/// Settings consumed by the playback engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Directory that catalog paths are relative to.
    pub songs_root: PathBuf,
    /// Sample rate the output sink runs at.
    pub sample_rate: u32,
    /// Channel count the output sink runs at.
    pub channels: u16,
    /// Frames read from the decoder per delivery.
    pub buffer_frames: usize,
    /// Upper bound on a single blocking write into the sink.
    pub sink_timeout_ms: u64,
    /// Reject `play` of the song that is already playing or paused.
    pub reject_replay_of_active: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            songs_root: PathBuf::from("."),
            sample_rate: 48000,
            channels: 2,
            buffer_frames: 1024,
            sink_timeout_ms: 20,
            reject_replay_of_active: true,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        debug!("Loading engine config from {}", path.display());
        Self::from_toml_str(&text)
    }

    /// Per-user config file location (`cadenza.toml` in the platform config dir).
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "cadenza", "Cadenza")
            .map(|dirs| dirs.config_dir().join("cadenza.toml"))
    }

    /// Apply `SONGS_PATH` when it is set and non-empty.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_songs_root_override(std::env::var_os(SONGS_PATH_ENV).map(PathBuf::from))
    }

    fn with_songs_root_override(mut self, root: Option<PathBuf>) -> Self {
        if let Some(root) = root.filter(|r| !r.as_os_str().is_empty()) {
            debug!("Songs root overridden to {}", root.display());
            self.songs_root = root;
        }
        self
    }

    /// Check that every field is usable.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be positive".into()));
        }
        if self.channels == 0 {
            return Err(Error::Config("channels must be positive".into()));
        }
        if self.buffer_frames == 0 {
            return Err(Error::Config("buffer_frames must be positive".into()));
        }
        if self.sink_timeout_ms == 0 {
            return Err(Error::Config("sink_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub const fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_timeout_ms)
    }
}
