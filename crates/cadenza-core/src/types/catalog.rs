//! Song catalog backed by a JSON file.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::Song;
use crate::{Error, Result};

/// Thread-safe list of songs.
///
/// Readers take snapshots so a lookup never observes a half-applied mutation.
#[derive(Debug, Default)]
pub struct Catalog {
    songs: RwLock<Vec<Song>>,
    /// Backing file, if the catalog was loaded from disk.
    path: Option<PathBuf>,
}

impl Catalog {
    /// Create an in-memory catalog.
    pub fn from_songs(songs: Vec<Song>) -> Self {
        Self {
            songs: RwLock::new(songs),
            path: None,
        }
    }

    /// Load a catalog from a JSON array of songs.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let songs: Vec<Song> = serde_json::from_slice(&data)?;

        info!("Loaded {} songs from {}", songs.len(), path.display());

        Ok(Self {
            songs: RwLock::new(songs),
            path: Some(path.to_path_buf()),
        })
    }

    /// Write the catalog back to its backing file.
    ///
    /// The new contents go to a temporary file in the same directory which is
    /// then renamed over the old one, so readers see either version in full.
    /// In-memory catalogs have nothing to persist.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = serde_json::to_vec_pretty(&*self.songs.read())?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(&json)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| Error::Io(e.error))?;

        debug!("Saved catalog to {}", path.display());
        Ok(())
    }

    /// Copy of the current song list.
    pub fn snapshot(&self) -> Vec<Song> {
        self.songs.read().clone()
    }

    /// Find a song by exact name.
    pub fn find(&self, name: &str) -> Option<Song> {
        self.songs.read().iter().find(|s| s.name == name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.songs.read().iter().map(|s| s.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.songs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.read().is_empty()
    }

    /// Add a song, rejecting duplicate names.
    pub fn add(&self, song: Song) -> Result<()> {
        let mut songs = self.songs.write();
        if songs.iter().any(|s| s.name == song.name) {
            return Err(Error::Duplicate(song.name));
        }
        songs.push(song);
        Ok(())
    }

    /// Remove a song by name.
    ///
    /// This does not know about playback; callers that must not remove the
    /// song being played go through the playback engine instead.
    pub fn remove(&self, name: &str) -> Result<Song> {
        let mut songs = self.songs.write();
        let index = songs
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        Ok(songs.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        Catalog::from_songs(vec![
            Song::new("Track1", "t1.mp3"),
            Song::new("Track2", "t2.mp3"),
        ])
    }

    #[test]
    fn test_find_is_exact() {
        let catalog = catalog();
        assert!(catalog.find("Track1").is_some());
        assert!(catalog.find("track1").is_none());
        assert!(catalog.find("Track").is_none());
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let catalog = catalog();
        assert!(matches!(
            catalog.add(Song::new("Track1", "other.mp3")),
            Err(Error::Duplicate(_))
        ));
        catalog.add(Song::new("Track3", "t3.mp3")).unwrap();
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn test_remove() {
        let catalog = catalog();
        assert_eq!(catalog.remove("Track1").unwrap().name, "Track1");
        assert!(matches!(catalog.remove("Track1"), Err(Error::NotFound(_))));
        assert_eq!(catalog.names(), ["Track2"]);
    }

    #[test]
    fn test_load_and_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("songs.json");
        std::fs::write(
            &path,
            r#"[{"Name":"My Number One","Artist":"Helena","Genre":"Pop","FilePath":"/one.mp3"}]"#,
        )
        .unwrap();

        let catalog = Catalog::load(&path).unwrap();
        assert_eq!(catalog.find("My Number One").unwrap().relative_path, "/one.mp3");

        catalog.add(Song::new("Other", "other.mp3")).unwrap();
        catalog.save().unwrap();

        let reloaded = Catalog::load(&path).unwrap();
        assert_eq!(reloaded.names(), ["My Number One", "Other"]);
    }

    #[test]
    fn test_save_replaces_file_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("songs.json");
        std::fs::write(&path, r#"[{"name":"A","filePath":"a.mp3"}]"#).unwrap();

        let catalog = Catalog::load(&path).unwrap();
        catalog.remove("A").unwrap();
        catalog.add(Song::new("B", "b.mp3")).unwrap();
        catalog.save().unwrap();

        // No temporary files are left next to the catalog.
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, ["songs.json"]);
        assert_eq!(Catalog::load(&path).unwrap().names(), ["B"]);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Catalog::load(dir.path().join("nope.json")),
            Err(Error::Io(_))
        ));
    }
}
