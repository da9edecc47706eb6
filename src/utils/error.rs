//! Error handling utilities for graceful degradation
//!
//! Provides helpers for best-effort operations (settings flushes, staging
//! cleanup) and for turning caught panics into loggable messages.

use std::any::Any;
use tracing::warn;

/// Execute an operation and log errors without failing
///
/// Returns `Some(T)` on success, `None` on error (after logging).
///
/// # Example
/// ```rust
/// use modhost::utils::log_error;
///
/// let result = log_error(|| std::fs::read("missing.toml"), "Failed to read settings");
/// assert!(result.is_none());
/// ```
pub fn log_error<F, T, E>(operation: F, context: &str) -> Option<T>
where
    F: FnOnce() -> Result<T, E>,
    E: std::fmt::Display,
{
    match operation() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{}: {}", context, e);
            None
        }
    }
}

/// Extract a readable message from a caught panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
