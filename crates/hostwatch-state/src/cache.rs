//! Cached collection files

use hostwatch_core::Result;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory where collection runs leave archives and intermediate output
#[derive(Debug, Clone)]
pub struct CacheDir {
    path: PathBuf,
}

impl CacheDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove everything inside the cache directory, keeping the directory
    ///
    /// Returns the number of entries removed. A missing directory counts as empty.
    pub fn clear(&self) -> Result<usize> {
        let entries = match std::fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
            debug!("Removed cached {}", path.display());
            removed += 1;
        }

        if removed > 0 {
            debug!("Deleted {} cached file(s) from {}", removed, self.path.display());
        }
        Ok(removed)
    }
}
