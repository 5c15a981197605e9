//! Mock remote service for testing

use async_trait::async_trait;
use hostwatch_core::{ArchiveArtifact, CollectionRules, HostwatchError, Result, UploadResponse};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::service::RemoteService;

/// Failure a mock call should raise
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    Timeout,
    PayloadTooLarge,
    Unregistered,
    InvalidContentType,
    Transport(String),
    Status(u16),
}

impl MockFailure {
    fn to_error(&self) -> HostwatchError {
        match self {
            Self::Timeout => HostwatchError::Timeout,
            Self::PayloadTooLarge => HostwatchError::PayloadTooLarge,
            Self::Unregistered => HostwatchError::Unregistered,
            Self::InvalidContentType => {
                HostwatchError::InvalidContentType("mock content type".to_string())
            }
            Self::Transport(msg) => HostwatchError::Transport(msg.clone()),
            Self::Status(status) => HostwatchError::Status {
                status: *status,
                body: String::new(),
            },
        }
    }
}

type Scripted<T> = std::result::Result<T, MockFailure>;

/// Number of times each operation was invoked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub check_registration: usize,
    pub register: usize,
    pub unregister: usize,
    pub upload_archive: usize,
    pub fetch_collection_rules: usize,
}

/// Arguments seen by one `upload_archive` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCall {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub duration_hint: Option<Duration>,
}

struct MockState {
    registered: Scripted<bool>,
    register_result: Scripted<()>,
    unregister_result: Scripted<bool>,
    uploads: VecDeque<Scripted<UploadResponse>>,
    default_upload: Scripted<UploadResponse>,
    rules: Scripted<CollectionRules>,
    calls: MockCalls,
    upload_calls: Vec<UploadCall>,
}

/// Scriptable remote service
///
/// Clones share state, so one instance can be handed to several components
/// and inspected afterwards.
#[derive(Clone)]
pub struct MockRemoteService {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockRemoteService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemoteService {
    /// Unregistered host; every call succeeds, uploads answer 200
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                registered: Ok(false),
                register_result: Ok(()),
                unregister_result: Ok(true),
                uploads: VecDeque::new(),
                default_upload: Ok(UploadResponse::new(200, "{}")),
                rules: Ok(CollectionRules::default()),
                calls: MockCalls::default(),
                upload_calls: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_registered(self, registered: bool) -> Self {
        self.lock().registered = Ok(registered);
        self
    }

    pub fn with_check_failure(self, failure: MockFailure) -> Self {
        self.lock().registered = Err(failure);
        self
    }

    pub fn with_register_failure(self, failure: MockFailure) -> Self {
        self.lock().register_result = Err(failure);
        self
    }

    pub fn with_unregister_result(self, result: Scripted<bool>) -> Self {
        self.lock().unregister_result = result;
        self
    }

    /// Queue upload results, consumed one per call
    pub fn with_upload_results(self, results: Vec<Scripted<UploadResponse>>) -> Self {
        self.lock().uploads.extend(results);
        self
    }

    /// Result returned once the queue is empty
    pub fn with_default_upload(self, result: Scripted<UploadResponse>) -> Self {
        self.lock().default_upload = result;
        self
    }

    pub fn with_rules(self, rules: CollectionRules) -> Self {
        self.lock().rules = Ok(rules);
        self
    }

    pub fn with_rules_failure(self, failure: MockFailure) -> Self {
        self.lock().rules = Err(failure);
        self
    }

    pub fn calls(&self) -> MockCalls {
        self.lock().calls
    }

    pub fn upload_calls(&self) -> Vec<UploadCall> {
        self.lock().upload_calls.clone()
    }
}

#[async_trait]
impl RemoteService for MockRemoteService {
    async fn check_registration(&self) -> Result<bool> {
        let mut state = self.lock();
        state.calls.check_registration += 1;
        state.registered.clone().map_err(|f| f.to_error())
    }

    async fn register(&self) -> Result<()> {
        let mut state = self.lock();
        state.calls.register += 1;
        state.register_result.clone().map_err(|f| f.to_error())?;
        state.registered = Ok(true);
        Ok(())
    }

    async fn unregister(&self) -> Result<bool> {
        let mut state = self.lock();
        state.calls.unregister += 1;
        let unregistered = state.unregister_result.clone().map_err(|f| f.to_error())?;
        if unregistered {
            state.registered = Ok(false);
        }
        Ok(unregistered)
    }

    async fn upload_archive(
        &self,
        artifact: &ArchiveArtifact,
        content_type: &str,
        duration_hint: Option<Duration>,
    ) -> Result<UploadResponse> {
        let mut state = self.lock();
        state.calls.upload_archive += 1;
        state.upload_calls.push(UploadCall {
            bytes: artifact.bytes.clone(),
            content_type: content_type.to_string(),
            duration_hint,
        });
        let next = match state.uploads.pop_front() {
            Some(result) => result,
            None => state.default_upload.clone(),
        };
        next.map_err(|f| f.to_error())
    }

    async fn fetch_collection_rules(&self) -> Result<CollectionRules> {
        let mut state = self.lock();
        state.calls.fetch_collection_rules += 1;
        state.rules.clone().map_err(|f| f.to_error())
    }
}
