//! Song type representing a single catalog entry.

use serde::{Deserialize, Serialize};

/// A single song in the catalog.
///
/// The on-disk catalog uses `filePath` for the asset location; older catalog
/// files capitalise every key, so both spellings are accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Song {
    /// Song name, unique within a catalog.
    #[serde(alias = "Name")]
    pub name: String,
    /// Artist name.
    #[serde(default, alias = "Artist")]
    pub artist: String,
    /// Genre label.
    #[serde(default, alias = "Genre")]
    pub genre: String,
    /// Location of the encoded asset under the songs root.
    #[serde(rename = "filePath", alias = "FilePath")]
    pub relative_path: String,
}

impl Song {
    pub fn new(name: impl Into<String>, relative_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            artist: String::new(),
            genre: String::new(),
            relative_path: relative_path.into(),
        }
    }

    #[must_use]
    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = artist.into();
        self
    }

    #[must_use]
    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = genre.into();
        self
    }

    /// "Artist - Name", or just the name when no artist is known.
    pub fn display_name(&self) -> String {
        if self.artist.is_empty() {
            self.name.clone()
        } else {
            format!("{} - {}", self.artist, self.name)
        }
    }
}
