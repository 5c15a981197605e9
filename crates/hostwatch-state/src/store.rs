//! Marker and record persistence

use chrono::{DateTime, Utc};
use hostwatch_core::{HostwatchError, RegistrationState, Result};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Presence/absence flags kept in the state directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    Registered,
    Unregistered,
    /// Timestamp of the last confirmed upload
    LastUpload,
}

impl Marker {
    pub fn file_name(&self) -> &'static str {
        match self {
            Marker::Registered => ".registered",
            Marker::Unregistered => ".unregistered",
            Marker::LastUpload => ".lastupload",
        }
    }

    /// The marker that must be absent whenever this one is present
    fn exclusive_with(&self) -> Option<Marker> {
        match self {
            Marker::Registered => Some(Marker::Unregistered),
            Marker::Unregistered => Some(Marker::Registered),
            Marker::LastUpload => None,
        }
    }
}

impl std::fmt::Display for Marker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

/// Records with a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Record {
    /// Stable host identifier (text token)
    MachineId,
    /// Raw body of the last successful upload response
    LastUploadResults,
}

impl Record {
    pub fn file_name(&self) -> &'static str {
        match self {
            Record::MachineId => "machine-id",
            Record::LastUploadResults => "last_upload_results",
        }
    }
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

/// File-backed store for markers and records
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn marker_path(&self, marker: Marker) -> PathBuf {
        self.dir.join(marker.file_name())
    }

    pub fn record_path(&self, record: Record) -> PathBuf {
        self.dir.join(record.file_name())
    }

    /// Write a marker, removing its mutually exclusive counterpart first
    ///
    /// The counterpart is removed before the new marker appears, so an observer
    /// can see neither marker for a moment but never both.
    pub fn write_marker(&self, marker: Marker) -> Result<()> {
        if let Some(other) = marker.exclusive_with() {
            self.delete_marker(other)?;
        }
        let stamp = Utc::now().to_rfc3339();
        self.write_atomic(&self.marker_path(marker), stamp.as_bytes())?;
        debug!("Wrote marker {}", marker);
        Ok(())
    }

    /// Remove a marker; a missing marker is not an error
    pub fn delete_marker(&self, marker: Marker) -> Result<()> {
        remove_if_exists(&self.marker_path(marker))
    }

    pub fn has_marker(&self, marker: Marker) -> bool {
        self.marker_path(marker).is_file()
    }

    pub fn write_record(&self, record: Record, bytes: &[u8]) -> Result<()> {
        self.write_atomic(&self.record_path(record), bytes)?;
        debug!("Wrote record {} ({} bytes)", record, bytes.len());
        Ok(())
    }

    pub fn read_record(&self, record: Record) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.record_path(record)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete_record(&self, record: Record) -> Result<()> {
        remove_if_exists(&self.record_path(record))
    }

    pub fn mark_registered(&self) -> Result<()> {
        self.write_marker(Marker::Registered)
    }

    pub fn mark_unregistered(&self) -> Result<()> {
        self.write_marker(Marker::Unregistered)
    }

    /// Drop both registration markers (forced re-registration)
    pub fn clear_registration(&self) -> Result<()> {
        self.delete_marker(Marker::Registered)?;
        self.delete_marker(Marker::Unregistered)
    }

    /// Reconstruct the registration state from the markers on disk
    pub fn registration_state(&self) -> RegistrationState {
        match (
            self.has_marker(Marker::Registered),
            self.has_marker(Marker::Unregistered),
        ) {
            (true, false) => RegistrationState::Registered,
            (false, true) => RegistrationState::Unregistered,
            (false, false) => RegistrationState::Unknown,
            (true, true) => {
                warn!(
                    "Both registration markers present in {}, treating state as unknown",
                    self.dir.display()
                );
                RegistrationState::Unknown
            }
        }
    }

    /// Time of the last confirmed upload, if one was recorded
    pub fn last_upload(&self) -> Result<Option<DateTime<Utc>>> {
        let path = self.marker_path(Marker::LastUpload);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        DateTime::parse_from_rfc3339(content.trim())
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| {
                HostwatchError::State(format!("Invalid timestamp in {}: {}", path.display(), e))
            })
    }

    /// Replace `path` with `bytes` via a temp file in the same directory
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))?;
        }

        tmp.persist(path).map_err(|e| {
            HostwatchError::State(format!("Failed to finalize {}: {}", path.display(), e.error))
        })?;
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
