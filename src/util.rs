//! Utility functions and helpers.

use std::panic::{catch_unwind, AssertUnwindSafe};

/// Run one observer callback inside its own failure boundary.
///
/// Errors and panics are logged and swallowed so the caller can keep
/// dispatching to the remaining observers. Returns whether the callback
/// succeeded.
pub fn isolate<F>(context: &str, f: F) -> bool
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::error!("Error in {}: {:#}", context, e);
            false
        }
        Err(_) => {
            tracing::error!("Panic in {}", context);
            false
        }
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
