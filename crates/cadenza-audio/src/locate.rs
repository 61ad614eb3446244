//! Resolution of catalog entries to files on disk.

use std::io;
use std::path::{Component, Path, PathBuf};

use cadenza_core::{Error, Result, Song};

/// Maps song names to asset paths under a fixed root directory.
#[derive(Debug, Clone)]
pub struct AssetLocator {
    root: PathBuf,
}

impl AssetLocator {
    /// Create a locator; a relative root is anchored at the working directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = std::path::absolute(root.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Cannot resolve songs root {}: {e}",
                root.as_ref().display()
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the song's asset.
    ///
    /// Catalog paths are often written with a leading separator; they are
    /// still treated as relative to the root. Paths that climb out of the root
    /// with `..` (or name another drive) fail with `OpenFailed`.
    pub fn path_for(&self, song: &Song) -> Result<PathBuf> {
        let relative = Path::new(song.relative_path.trim_start_matches(['/', '\\']));
        let escapes = relative.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });

        let path = self.root.join(relative);
        if escapes {
            return Err(Error::OpenFailed {
                path,
                source: io::Error::new(io::ErrorKind::InvalidInput, "path escapes songs root"),
            });
        }
        Ok(path)
    }

    /// Find `name` in the catalog (exact, case-sensitive) and build its path.
    pub fn locate(&self, name: &str, catalog: &[Song]) -> Result<(Song, PathBuf)> {
        let song = catalog
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        let path = self.path_for(song)?;
        Ok((song.clone(), path))
    }

    pub fn resolve(&self, name: &str, catalog: &[Song]) -> Result<PathBuf> {
        self.locate(name, catalog).map(|(_, path)| path)
    }
}
