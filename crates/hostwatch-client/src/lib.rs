//! # hostwatch-client
//!
//! Remote service capability for the hostwatch agent.
//!
//! This crate provides:
//! - The `RemoteService` trait (registration queries, register/unregister, upload)
//! - An HTTP implementation speaking either protocol generation
//! - A scriptable mock used by the orchestrator tests
//! - Credential resolution (config file with environment override)
//!
//! Failures are reported as typed `HostwatchError` variants (`Timeout`,
//! `PayloadTooLarge`, `Unregistered`, `InvalidContentType`) so callers can
//! decide what is worth retrying.

mod auth;
mod http;
mod mock;
mod service;

pub use auth::{resolve_credentials, Credentials, PASSWORD_ENV, USERNAME_ENV};
pub use http::{classify_upload_status, HttpRemoteService};
pub use mock::{MockCalls, MockFailure, MockRemoteService, UploadCall};
pub use service::RemoteService;
