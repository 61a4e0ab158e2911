//! Error types for the relay and its handles.
//!
//! Two kinds of failure exist and they never mix:
//! - [`HandleError`] lives inside a [`Handle`](crate::Handle) and only surfaces
//!   when the caller resolves that handle.
//! - [`RelayError`] is fatal to the whole relay and comes out of the relay's
//!   own iteration.

use std::any::Any;

/// Reason a work item did not produce its own output.
///
/// A work item that returns an `Err` of its own is not a `HandleError`: that
/// value is the item's output and is passed through untouched.
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    /// The item was cancelled by relay teardown before it finished.
    #[error("work item was cancelled")]
    Cancelled,
    /// The item panicked. The original payload is kept.
    #[error("work item panicked: {message}", message = panic_message(.0.as_ref()))]
    Panicked(Box<dyn Any + Send + 'static>),
}

impl HandleError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, HandleError::Cancelled)
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, HandleError::Panicked(_))
    }

    /// Consume the error and return the panic payload, if the item panicked.
    ///
    /// Pass the payload to [`std::panic::resume_unwind`] to re-raise the
    /// original panic in the caller.
    pub fn into_panic(self) -> Option<Box<dyn Any + Send + 'static>> {
        match self {
            HandleError::Panicked(payload) => Some(payload),
            HandleError::Cancelled => None,
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// Errors raised by the relay itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("concurrency limit must be at least 1")]
    InvalidLimit,
    #[error("relay must be created inside a tokio runtime")]
    NoRuntime,
    /// The caller's cancellation token fired while the relay was running.
    #[error("relay was cancelled by its caller")]
    Cancelled,
    /// A supervised task ended without reporting its outcome.
    #[error("supervision scope failed: {0}")]
    Scope(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_from_str_and_string() {
        let err = HandleError::Panicked(Box::new("boom"));
        assert_eq!(err.to_string(), "work item panicked: boom");

        let err = HandleError::Panicked(Box::new(String::from("owned boom")));
        assert_eq!(err.to_string(), "work item panicked: owned boom");

        let err = HandleError::Panicked(Box::new(42_u32));
        assert_eq!(
            err.to_string(),
            "work item panicked: <non-string panic payload>"
        );
    }

    #[test]
    fn into_panic_returns_original_payload() {
        let err = HandleError::Panicked(Box::new(7_i64));
        assert!(err.is_panic());
        let payload = err.into_panic().unwrap();
        assert_eq!(payload.downcast_ref::<i64>(), Some(&7));

        assert!(HandleError::Cancelled.into_panic().is_none());
    }

    #[test]
    fn relay_error_display() {
        assert_eq!(
            RelayError::Scope("task aborted".to_string()).to_string(),
            "supervision scope failed: task aborted"
        );
        assert_eq!(
            RelayError::InvalidLimit.to_string(),
            "concurrency limit must be at least 1"
        );
    }
}
