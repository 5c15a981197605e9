//! Core type definitions for hostwatch

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Registration state of this host, reconstructed from local markers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationState {
    Registered,
    Unregistered,
    #[default]
    Unknown,
}

impl std::fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registered => write!(f, "registered"),
            Self::Unregistered => write!(f, "unregistered"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Remote registration/upload contract revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolGeneration {
    /// Explicit agent-side registration, uploads keyed by machine id
    Legacy,
    /// Registration is assumed by the server, uploads carry a content type
    Modern,
}

impl ProtocolGeneration {
    /// Select the generation from the `legacy_upload` flag
    pub fn from_legacy_flag(legacy_upload: bool) -> Self {
        if legacy_upload {
            Self::Legacy
        } else {
            Self::Modern
        }
    }
}

impl std::fmt::Display for ProtocolGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Legacy => write!(f, "legacy"),
            Self::Modern => write!(f, "modern"),
        }
    }
}

/// Result of asking whether the host may proceed with a collection run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationDecision {
    /// Remote service already knows this host
    AlreadyRegistered,
    /// Host was registered during this invocation
    NewlyRegistered,
    /// Modern protocol: registration is handled server side
    Assumed,
    /// Host is unregistered and registration was not requested
    NotRegistered,
}

impl RegistrationDecision {
    /// Whether collection and upload may go ahead
    pub fn may_proceed(&self) -> bool {
        !matches!(self, Self::NotRegistered)
    }
}

/// What the caller asked the registration step to do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrationRequest {
    /// Drop local markers and machine identity before registering again
    pub force_reregister: bool,
    /// Register the host if the remote service does not know it
    pub register: bool,
}

/// Opaque collected payload handed to the upload path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveArtifact {
    /// Archive bytes, resent unchanged on every attempt
    pub bytes: Vec<u8>,
    /// MIME type of the archive
    pub content_type: String,
    /// How long collection took, forwarded to the service as a hint
    pub collection_duration: Option<Duration>,
}

impl ArchiveArtifact {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
            collection_duration: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.collection_duration = Some(duration);
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Raw server response to an upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: u16,
    pub body: String,
}

impl UploadResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 2xx responses are the only ones recorded as delivered
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Remote branch/leaf this host reports under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub remote_branch: i64,
    pub remote_leaf: i64,
}

impl Default for BranchInfo {
    fn default() -> Self {
        Self {
            remote_branch: -1,
            remote_leaf: -1,
        }
    }
}

/// Collection rule document, opaque to the agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionRules {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub document: serde_json::Value,
}

/// Operator-defined exclusions applied to a collection run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalConfig {
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl RemovalConfig {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
            && self.commands.is_empty()
            && self.patterns.is_empty()
            && self.keywords.is_empty()
    }

    /// Summarize the exclusions for the collector
    pub fn report(&self) -> BlacklistReport {
        BlacklistReport {
            obfuscate: false,
            file: self.files.len(),
            command: self.commands.len(),
            patterns: self.patterns.len(),
            keywords: self.keywords.len(),
        }
    }
}

/// Counts of operator exclusions, attached to the archive by the collector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistReport {
    pub obfuscate: bool,
    pub file: usize,
    pub command: usize,
    pub patterns: usize,
    pub keywords: usize,
}
