//! # hostwatch-orchestrator
//!
//! Lifecycle engine for the hostwatch agent.
//!
//! This crate provides:
//! - Registration managers for the legacy and modern protocol generations
//! - The upload manager and its fixed-backoff retry loop
//! - The collection runner capability and a command-based implementation
//! - Scheduler cleanup used when a host is unregistered
//! - The orchestrator that sequences registration, collection and upload
//!
//! Everything runs sequentially within one invocation. The only intentional
//! wait is the backoff between upload attempts, provided by a `Sleeper`.

mod collection;
mod orchestrator;
mod registration;
mod schedule;
mod sleeper;
#[cfg(test)]
mod test_support;
mod upload;

pub use collection::{load_removal_config, load_rules, CollectionRunner, CommandCollector};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use registration::{
    registration_for, LegacyRegistration, LocalCleanup, ModernRegistration, RegistrationManager,
};
pub use schedule::{CronScheduler, Scheduler};
pub use sleeper::{RecordingSleeper, Sleeper, TokioSleeper};
pub use upload::{
    upload_protocol_for, AttemptOutcome, LegacyUpload, ModernUpload, UploadAttempt, UploadManager,
    UploadProtocol, UploadSummary,
};
