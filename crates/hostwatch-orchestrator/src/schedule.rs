//! Periodic collection schedule

use async_trait::async_trait;
use hostwatch_core::{HostwatchError, Result};
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

/// Removes whatever triggers periodic agent runs
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Returns `true` when a schedule entry was removed
    async fn remove_scheduling(&self) -> Result<bool>;
}

/// Schedule implemented as an entry (usually a symlink) in a cron directory
#[derive(Debug, Clone)]
pub struct CronScheduler {
    path: PathBuf,
}

impl CronScheduler {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Scheduler for CronScheduler {
    async fn remove_scheduling(&self) -> Result<bool> {
        match tokio::fs::symlink_metadata(&self.path).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No schedule entry at {}", self.path.display());
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        tokio::fs::remove_file(&self.path).await.map_err(|e| {
            HostwatchError::Schedule(format!(
                "Failed to remove schedule entry {}: {}",
                self.path.display(),
                e
            ))
        })?;
        debug!("Automatic scheduling disabled ({} removed)", self.path.display());
        Ok(true)
    }
}
