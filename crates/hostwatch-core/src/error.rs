//! Unified error types for hostwatch

use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for all hostwatch operations
#[derive(Error, Debug)]
pub enum HostwatchError {
    // Remote service failures
    #[error("Request to remote service timed out")]
    Timeout,

    #[error("Archive is too large to be accepted by the remote service")]
    PayloadTooLarge,

    #[error("This host is not registered with the remote service")]
    Unregistered,

    #[error("Remote service rejected the archive content type: {0}")]
    InvalidContentType(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote service returned status {status}: {body}")]
    Status { status: u16, body: String },

    // Upload errors
    #[error("Upload failed after {attempts} attempt(s). Please see {} for additional information", log_file.display())]
    UploadFailed { attempts: u32, log_file: PathBuf },

    #[error("Upload aborted: {reason}. Please see {} for additional information", log_file.display())]
    UploadAborted { reason: String, log_file: PathBuf },

    // Precondition errors
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Not available in offline mode: {0}")]
    Offline(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // Local state errors
    #[error("Local state error: {0}")]
    State(String),

    #[error("Collection error: {0}")]
    Collection(String),

    #[error("Scheduler error: {0}")]
    Schedule(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using HostwatchError
pub type Result<T> = std::result::Result<T, HostwatchError>;
