//! Fail-open execution for best-effort housekeeping
//!
//! Some steps of the agent lifecycle are housekeeping: removing the periodic
//! schedule or clearing cached collection files after unregistration. A failure
//! there must not turn a confirmed remote state change into a reported failure.
//!
//! DO NOT use fail-open for:
//! - Registration markers (they encode the registration state)
//! - Upload records (only written after confirmed delivery)
//! - Remote calls

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Run a housekeeping operation, logging and swallowing its error
///
/// Returns `None` when the operation failed.
///
/// ```no_run
/// use hostwatch_core::fail_open::fail_open;
/// use hostwatch_core::Result;
///
/// async fn clear_cache() -> Result<usize> {
///     Ok(0)
/// }
///
/// async fn example() {
///     let removed = fail_open("delete_cache_files", || clear_cache()).await;
///     // removed is None if clear_cache() failed
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}
