//! Error types for Cadenza.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using Cadenza's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Cadenza.
#[derive(Error, Debug)]
pub enum Error {
    // Lookup errors
    #[error("Song not found: {0}")]
    NotFound(String),

    #[error("Song already exists: {0}")]
    Duplicate(String),

    // Audio errors
    #[error("Failed to open {}: {source}", path.display())]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Audio decode error: {0}")]
    DecodeFailed(String),

    #[error("Audio output error: {0}")]
    SinkFailed(String),

    // Session errors
    #[error("Song is in use: {0}")]
    Busy(String),

    #[error("Nothing is playing")]
    NotPlaying,

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::OpenFailed {
            path: PathBuf::from("/songs/t1.mp3"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(err.to_string(), "Failed to open /songs/t1.mp3: missing");

        let err = Error::InvalidState {
            operation: "pause",
            state: "idle".into(),
        };
        assert_eq!(err.to_string(), "Cannot pause while idle");
    }
}
