//! # hostwatch-core
//!
//! Core types for the hostwatch data-collection agent.
//!
//! The agent runs once per invocation and walks a fixed lifecycle:
//!
//! - Decide whether this host is registered with the remote service
//! - Run a collection that produces an opaque archive
//! - Deliver the archive, retrying transient failures
//!
//! Two protocol generations (legacy and modern) are supported side by side.
//! This crate holds the vocabulary shared by every other crate: errors,
//! configuration, and the domain types that cross crate boundaries.

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::{AgentConfig, AuthMethod};
pub use error::{HostwatchError, Result};
pub use types::*;
