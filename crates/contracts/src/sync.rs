//! Sync keys, shared metadata and the user-callback boundary
//!
//! Every user-supplied callback returns [`CallbackResult`]. The core runs it
//! through [`invoke_guarded`], which turns both `Err` values and panics into a
//! [`CallbackFailure`] the caller logs and suppresses.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Key joining a frame with its metadata (capture timestamp in nanoseconds)
pub type SyncKey = u64;

/// Immutable JSON-like metadata, shared once produced
pub type Metadata = Arc<serde_json::Value>;

/// Error type user callbacks may return
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Result type of every user callback
pub type CallbackResult = Result<(), CallbackError>;

/// Why a guarded callback did not complete normally
#[derive(Debug)]
pub enum CallbackFailure {
    /// The callback returned `Err`
    Error(CallbackError),
    /// The callback panicked
    Panic(String),
}

impl fmt::Display for CallbackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackFailure::Error(e) => write!(f, "callback failed: {e}"),
            CallbackFailure::Panic(msg) => write!(f, "callback panicked: {msg}"),
        }
    }
}

/// Run a user callback, converting `Err` and panics into [`CallbackFailure`]
pub fn invoke_guarded<F>(f: F) -> Result<(), CallbackFailure>
where
    F: FnOnce() -> CallbackResult,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(CallbackFailure::Error(e)),
        Err(payload) => Err(CallbackFailure::Panic(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoke_guarded_ok() {
        assert!(invoke_guarded(|| Ok(())).is_ok());
    }

    #[test]
    fn test_invoke_guarded_error() {
        let result = invoke_guarded(|| Err("bad frame".into()));
        match result {
            Err(CallbackFailure::Error(e)) => assert_eq!(e.to_string(), "bad frame"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_invoke_guarded_panic() {
        let result = invoke_guarded(|| panic!("boom"));
        match result {
            Err(CallbackFailure::Panic(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
