//! # hostwatch-state
//!
//! Local state of the hostwatch agent on the host filesystem.
//!
//! This crate provides:
//! - Registration markers (`.registered` / `.unregistered`, mutually exclusive)
//! - Records: machine identity and the last upload response
//! - The last-upload timestamp marker
//! - Cache directory cleanup used after unregistration
//!
//! Every write replaces a file atomically (temp file + rename), so an observer
//! never sees a half-written marker. No locking is done: one agent process at a
//! time is expected to touch these files.

mod cache;
mod identity;
mod store;

pub use cache::CacheDir;
pub use identity::MachineIdentity;
pub use store::{Marker, Record, StateStore};
