//! Remote service contract

use async_trait::async_trait;
use hostwatch_core::{ArchiveArtifact, CollectionRules, Result, UploadResponse};
use std::time::Duration;

/// Operations the agent needs from the remote service (allows mocking in tests)
///
/// Implementations resolve the machine identity themselves; callers that
/// regenerate it must do so before the next call.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Whether the service knows this host as registered
    async fn check_registration(&self) -> Result<bool>;

    /// Register this host
    async fn register(&self) -> Result<()>;

    /// Unregister this host; `false` when the service refused
    async fn unregister(&self) -> Result<bool>;

    /// Send one archive. Non-2xx statuses are returned as responses, not errors,
    /// unless they map to a typed failure.
    async fn upload_archive(
        &self,
        artifact: &ArchiveArtifact,
        content_type: &str,
        duration_hint: Option<Duration>,
    ) -> Result<UploadResponse>;

    /// Download the current collection rules
    async fn fetch_collection_rules(&self) -> Result<CollectionRules>;
}
