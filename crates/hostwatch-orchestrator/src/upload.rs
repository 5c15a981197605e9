//! Archive delivery with bounded, fixed-backoff retries
//!
//! One retry loop serves both protocol generations. What differs per
//! generation (content type, which failures abort immediately, what gets
//! recorded after success) lives behind [`UploadProtocol`].

use hostwatch_client::RemoteService;
use hostwatch_core::{
    AgentConfig, ArchiveArtifact, HostwatchError, ProtocolGeneration, Result, UploadResponse,
};
use hostwatch_state::{Marker, Record, StateStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::sleeper::{Sleeper, TokioSleeper};

/// Per-generation upload policy
pub trait UploadProtocol: Send + Sync {
    fn generation(&self) -> ProtocolGeneration;

    /// Content type sent with the archive
    fn content_type<'a>(&self, artifact: &'a ArchiveArtifact) -> &'a str;

    /// Failures that end the upload without consuming the remaining attempts
    fn is_fatal(&self, error: &HostwatchError) -> bool;

    /// Persist whatever this generation keeps after a confirmed upload
    ///
    /// Returns the parsed server response when there is one.
    fn record_success(
        &self,
        store: &StateStore,
        response: &UploadResponse,
    ) -> Result<Option<serde_json::Value>>;
}

/// Uploads keyed by machine id, no content type
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyUpload;

impl UploadProtocol for LegacyUpload {
    fn generation(&self) -> ProtocolGeneration {
        ProtocolGeneration::Legacy
    }

    fn content_type<'a>(&self, _artifact: &'a ArchiveArtifact) -> &'a str {
        ""
    }

    fn is_fatal(&self, error: &HostwatchError) -> bool {
        matches!(
            error,
            HostwatchError::PayloadTooLarge | HostwatchError::Unregistered
        )
    }

    fn record_success(
        &self,
        store: &StateStore,
        response: &UploadResponse,
    ) -> Result<Option<serde_json::Value>> {
        store.write_record(Record::LastUploadResults, response.body.as_bytes())?;
        match serde_json::from_str(&response.body) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Upload response is not valid JSON: {}", e);
                Ok(None)
            }
        }
    }
}

/// Ingress uploads carrying the archive content type
#[derive(Debug, Clone, Copy, Default)]
pub struct ModernUpload;

impl UploadProtocol for ModernUpload {
    fn generation(&self) -> ProtocolGeneration {
        ProtocolGeneration::Modern
    }

    fn content_type<'a>(&self, artifact: &'a ArchiveArtifact) -> &'a str {
        &artifact.content_type
    }

    fn is_fatal(&self, error: &HostwatchError) -> bool {
        matches!(
            error,
            HostwatchError::PayloadTooLarge | HostwatchError::InvalidContentType(_)
        )
    }

    fn record_success(
        &self,
        _store: &StateStore,
        _response: &UploadResponse,
    ) -> Result<Option<serde_json::Value>> {
        Ok(None)
    }
}

pub fn upload_protocol_for(generation: ProtocolGeneration) -> Box<dyn UploadProtocol> {
    match generation {
        ProtocolGeneration::Legacy => Box::new(LegacyUpload),
        ProtocolGeneration::Modern => Box::new(ModernUpload),
    }
}

/// What one attempt amounted to
#[derive(Debug)]
pub enum AttemptOutcome {
    Success(UploadResponse),
    /// Timeout, transport failure or non-success status; `status` is `None`
    /// when no response arrived
    Retryable { status: Option<u16> },
    Fatal(HostwatchError),
}

#[derive(Debug)]
pub struct UploadAttempt {
    /// 1-based
    pub number: u32,
    pub outcome: AttemptOutcome,
}

/// Result of a delivered upload
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSummary {
    /// Attempts used, including the successful one
    pub attempts: u32,
    pub response: UploadResponse,
    /// Parsed legacy response body
    pub api_response: Option<serde_json::Value>,
}

/// Delivers an archive through the remote service
pub struct UploadManager<R: RemoteService> {
    remote: R,
    store: StateStore,
    protocol: Box<dyn UploadProtocol>,
    sleeper: Arc<dyn Sleeper>,
    retries: u32,
    backoff: Duration,
    log_file: PathBuf,
    host_name: String,
    account_number: Option<String>,
    register_hint: Option<String>,
}

impl<R: RemoteService> UploadManager<R> {
    pub fn new(config: &AgentConfig, remote: R, store: StateStore) -> Self {
        Self {
            remote,
            store,
            protocol: upload_protocol_for(config.protocol()),
            sleeper: Arc::new(TokioSleeper),
            // At least one attempt, even if validation was skipped
            retries: config.retries.max(1),
            backoff: config.backoff(),
            log_file: config.logging_file.clone(),
            host_name: config.host_name(),
            account_number: config.account_number.clone(),
            register_hint: config.register.then(|| config.base_url.clone()),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn generation(&self) -> ProtocolGeneration {
        self.protocol.generation()
    }

    /// Upload `artifact`, retrying transient failures with a fixed backoff
    ///
    /// The same bytes are sent on every attempt. The last-upload marker is
    /// written only after a 2xx response.
    pub async fn upload(
        &self,
        artifact: &ArchiveArtifact,
        duration_hint: Option<Duration>,
    ) -> Result<UploadSummary> {
        let content_type = self.protocol.content_type(artifact);
        debug!(
            "Uploading {} bytes ({}) with up to {} attempt(s)",
            artifact.len(),
            self.protocol.generation(),
            self.retries
        );

        for number in 1..=self.retries {
            let attempt = self
                .attempt(number, artifact, content_type, duration_hint)
                .await;

            match attempt.outcome {
                AttemptOutcome::Success(response) => {
                    return self.finish(attempt.number, response);
                }
                AttemptOutcome::Fatal(e) => {
                    error!(
                        "Upload attempt {} of {} failed: {}",
                        attempt.number, self.retries, e
                    );
                    error!(
                        "Please see {} for additional information",
                        self.log_file.display()
                    );
                    return Err(HostwatchError::UploadAborted {
                        reason: e.to_string(),
                        log_file: self.log_file.clone(),
                    });
                }
                AttemptOutcome::Retryable { status } => {
                    let status = status
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "none".to_string());
                    error!(
                        "Upload attempt {} of {} failed! Status code: {}",
                        attempt.number, self.retries, status
                    );
                    if attempt.number < self.retries {
                        info!("Waiting {} seconds then retrying", self.backoff.as_secs());
                        self.sleeper.sleep(self.backoff).await;
                    } else {
                        error!("All attempts to upload have failed!");
                        error!(
                            "Please see {} for additional information",
                            self.log_file.display()
                        );
                    }
                }
            }
        }

        Err(HostwatchError::UploadFailed {
            attempts: self.retries,
            log_file: self.log_file.clone(),
        })
    }

    async fn attempt(
        &self,
        number: u32,
        artifact: &ArchiveArtifact,
        content_type: &str,
        duration_hint: Option<Duration>,
    ) -> UploadAttempt {
        let result = self
            .remote
            .upload_archive(artifact, content_type, duration_hint)
            .await;
        UploadAttempt {
            number,
            outcome: self.classify(result),
        }
    }

    fn classify(&self, result: Result<UploadResponse>) -> AttemptOutcome {
        match result {
            Ok(response) if response.is_success() => AttemptOutcome::Success(response),
            Ok(response) => {
                debug!("Upload response body: {}", response.body);
                AttemptOutcome::Retryable {
                    status: Some(response.status),
                }
            }
            Err(e) if self.protocol.is_fatal(&e) => AttemptOutcome::Fatal(e),
            Err(HostwatchError::Timeout) => {
                warn!("Upload request timed out");
                AttemptOutcome::Retryable { status: None }
            }
            Err(HostwatchError::Transport(msg)) => {
                warn!("Upload request failed: {}", msg);
                AttemptOutcome::Retryable { status: None }
            }
            Err(HostwatchError::Status { status, .. }) => AttemptOutcome::Retryable {
                status: Some(status),
            },
            Err(e) => AttemptOutcome::Fatal(e),
        }
    }

    fn finish(&self, attempts: u32, response: UploadResponse) -> Result<UploadSummary> {
        let api_response = self.protocol.record_success(&self.store, &response)?;
        self.store.write_marker(Marker::LastUpload)?;

        match &self.account_number {
            Some(account) => info!(
                "Successfully uploaded report from {} to account {}.",
                self.host_name, account
            ),
            None => info!("Successfully uploaded report for {}.", self.host_name),
        }
        if let Some(url) = &self.register_hint {
            info!("View details about this system on {}", url);
        }

        Ok(UploadSummary {
            attempts,
            response,
            api_response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleeper::RecordingSleeper;
    use crate::test_support::capture_logs;
    use hostwatch_client::{MockFailure, MockRemoteService};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: StateStore,
        sleeper: RecordingSleeper,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let store = StateStore::new(dir.path().join("state"));
            Self {
                _dir: dir,
                store,
                sleeper: RecordingSleeper::new(),
            }
        }

        fn manager(
            &self,
            config: &AgentConfig,
            remote: MockRemoteService,
        ) -> UploadManager<MockRemoteService> {
            UploadManager::new(config, remote, self.store.clone())
                .with_sleeper(Arc::new(self.sleeper.clone()))
        }
    }

    fn config(retries: u32, legacy_upload: bool) -> AgentConfig {
        AgentConfig {
            retries,
            legacy_upload,
            backoff_secs: 30,
            display_name: Some("db-02".to_string()),
            logging_file: PathBuf::from("/var/log/hostwatch/test.log"),
            ..AgentConfig::default()
        }
    }

    fn artifact() -> ArchiveArtifact {
        ArchiveArtifact::new(b"archive-bytes".to_vec(), "application/vnd.hostwatch+tgz")
    }

    #[tokio::test]
    async fn test_always_timeout_exhausts_attempts() {
        let fx = Fixture::new();
        let remote = MockRemoteService::new().with_default_upload(Err(MockFailure::Timeout));
        let manager = fx.manager(&config(4, true), remote.clone());

        let err = manager.upload(&artifact(), None).await.unwrap_err();

        match err {
            HostwatchError::UploadFailed { attempts, log_file } => {
                assert_eq!(attempts, 4);
                assert_eq!(log_file, PathBuf::from("/var/log/hostwatch/test.log"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(remote.calls().upload_archive, 4);
        assert_eq!(fx.sleeper.count(), 3);
        assert!(fx
            .sleeper
            .sleeps()
            .iter()
            .all(|d| *d == Duration::from_secs(30)));
        assert!(!fx.store.has_marker(Marker::LastUpload));
    }

    #[tokio::test]
    async fn test_success_on_attempt_k() {
        let fx = Fixture::new();
        let remote = MockRemoteService::new().with_upload_results(vec![
            Err(MockFailure::Timeout),
            Err(MockFailure::Transport("connection refused".into())),
            Ok(UploadResponse::new(201, "{\"id\": \"abc\"}")),
        ]);
        let manager = fx.manager(&config(5, true), remote.clone());

        let summary = manager.upload(&artifact(), None).await.unwrap();

        assert_eq!(summary.attempts, 3);
        assert_eq!(remote.calls().upload_archive, 3);
        assert_eq!(fx.sleeper.count(), 2);
        assert!(fx.store.has_marker(Marker::LastUpload));
    }

    #[tokio::test]
    async fn test_payload_too_large_is_not_retried() {
        let fx = Fixture::new();
        let remote =
            MockRemoteService::new().with_upload_results(vec![Err(MockFailure::PayloadTooLarge)]);
        let manager = fx.manager(&config(3, false), remote.clone());

        let err = manager.upload(&artifact(), None).await.unwrap_err();

        assert!(matches!(err, HostwatchError::UploadAborted { .. }));
        assert!(err.to_string().contains("/var/log/hostwatch/test.log"));
        assert_eq!(remote.calls().upload_archive, 1);
        assert_eq!(fx.sleeper.count(), 0);
        assert!(!fx.store.has_marker(Marker::LastUpload));
    }

    #[tokio::test]
    async fn test_generation_specific_fatal_errors() {
        let fx = Fixture::new();
        let remote =
            MockRemoteService::new().with_upload_results(vec![Err(MockFailure::Unregistered)]);
        let manager = fx.manager(&config(3, true), remote.clone());
        assert!(matches!(
            manager.upload(&artifact(), None).await,
            Err(HostwatchError::UploadAborted { .. })
        ));
        assert_eq!(remote.calls().upload_archive, 1);

        let remote = MockRemoteService::new()
            .with_upload_results(vec![Err(MockFailure::InvalidContentType)]);
        let manager = fx.manager(&config(3, false), remote.clone());
        assert!(matches!(
            manager.upload(&artifact(), None).await,
            Err(HostwatchError::UploadAborted { .. })
        ));
        assert_eq!(remote.calls().upload_archive, 1);
    }

    #[tokio::test]
    async fn test_modern_recovers_after_two_server_errors() {
        let fx = Fixture::new();
        let remote = MockRemoteService::new().with_upload_results(vec![
            Ok(UploadResponse::new(500, "")),
            Ok(UploadResponse::new(500, "")),
            Ok(UploadResponse::new(202, "")),
        ]);
        let manager = fx.manager(&config(3, false), remote.clone());

        let summary = manager.upload(&artifact(), None).await.unwrap();

        assert_eq!(summary.attempts, 3);
        assert_eq!(summary.response.status, 202);
        assert_eq!(summary.api_response, None);
        assert_eq!(fx.sleeper.count(), 2);
        assert!(fx.store.last_upload().unwrap().is_some());
        // Modern uploads keep no response record
        assert!(fx
            .store
            .read_record(Record::LastUploadResults)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_same_bytes_on_every_attempt() {
        let fx = Fixture::new();
        let remote = MockRemoteService::new().with_upload_results(vec![
            Ok(UploadResponse::new(503, "")),
            Ok(UploadResponse::new(200, "{}")),
        ]);
        let manager = fx.manager(&config(2, false), remote.clone());
        let duration = Duration::from_secs(42);

        manager.upload(&artifact(), Some(duration)).await.unwrap();

        let calls = remote.upload_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
        assert_eq!(calls[0].bytes, b"archive-bytes".to_vec());
        assert_eq!(calls[0].content_type, "application/vnd.hostwatch+tgz");
        assert_eq!(calls[0].duration_hint, Some(duration));
    }

    #[tokio::test]
    async fn test_legacy_records_response_body() {
        let fx = Fixture::new();
        let body = "{\"reports\": [], \"upload\": {\"account_number\": \"540155\"}}";
        let remote =
            MockRemoteService::new().with_upload_results(vec![Ok(UploadResponse::new(200, body))]);
        let manager = fx.manager(&config(1, true), remote.clone());

        let summary = manager.upload(&artifact(), None).await.unwrap();

        assert_eq!(
            fx.store.read_record(Record::LastUploadResults).unwrap(),
            Some(body.as_bytes().to_vec())
        );
        let api = summary.api_response.unwrap();
        assert_eq!(api["upload"]["account_number"], "540155");
        // Legacy uploads send no content type
        assert_eq!(remote.upload_calls()[0].content_type, "");
    }

    #[tokio::test]
    async fn test_legacy_non_json_body_still_succeeds() {
        let fx = Fixture::new();
        let remote = MockRemoteService::new()
            .with_upload_results(vec![Ok(UploadResponse::new(200, "accepted"))]);
        let manager = fx.manager(&config(1, true), remote);

        let summary = manager.upload(&artifact(), None).await.unwrap();
        assert_eq!(summary.api_response, None);
        assert!(fx.store.has_marker(Marker::LastUpload));
    }

    #[tokio::test]
    async fn test_zero_retries_still_attempts_once() {
        let fx = Fixture::new();
        let remote = MockRemoteService::new();
        let manager = fx.manager(&config(0, false), remote.clone());

        manager.upload(&artifact(), None).await.unwrap();
        assert_eq!(remote.calls().upload_archive, 1);
    }

    #[tokio::test]
    async fn test_retry_log_lines() {
        let (logs, _guard) = capture_logs(tracing::Level::DEBUG);

        let fx = Fixture::new();
        let remote = MockRemoteService::new().with_upload_results(vec![
            Ok(UploadResponse::new(500, "")),
            Err(MockFailure::Timeout),
        ]);
        let manager = fx.manager(&config(2, false), remote);
        manager.upload(&artifact(), None).await.unwrap_err();

        let logs = logs.contents();
        assert!(logs.contains("Upload attempt 1 of 2 failed! Status code: 500"));
        assert!(logs.contains("Waiting 30 seconds then retrying"));
        assert!(logs.contains("Upload attempt 2 of 2 failed! Status code: none"));
        assert!(logs.contains("All attempts to upload have failed!"));
        assert!(logs.contains("Please see /var/log/hostwatch/test.log for additional information"));
    }

    #[tokio::test]
    async fn test_success_summary_names_account() {
        let (logs, _guard) = capture_logs(tracing::Level::INFO);

        let fx = Fixture::new();
        let config = AgentConfig {
            account_number: Some("540155".to_string()),
            ..config(1, true)
        };
        fx.manager(&config, MockRemoteService::new())
            .upload(&artifact(), None)
            .await
            .unwrap();

        let logs = logs.contents();
        assert!(logs.contains("Successfully uploaded report from db-02 to account 540155."));
    }

    #[test]
    fn test_protocol_selection() {
        assert_eq!(
            upload_protocol_for(ProtocolGeneration::Legacy).generation(),
            ProtocolGeneration::Legacy
        );
        assert_eq!(
            upload_protocol_for(ProtocolGeneration::Modern).generation(),
            ProtocolGeneration::Modern
        );
        assert!(!ModernUpload.is_fatal(&HostwatchError::Timeout));
        assert!(!LegacyUpload.is_fatal(&HostwatchError::InvalidContentType(String::new())));
    }
}
