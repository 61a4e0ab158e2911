//! Handle to one resolved work item.

use std::future::{IntoFuture, Ready, ready};
use std::time::Duration;

use crate::error::HandleError;

/// Outcome of one submitted work item, yielded by the relay once the item
/// has resolved.
///
/// The relay never looks inside the outcome. A failing item is reported
/// only when the caller asks for the result, via [`Handle::into_result`],
/// [`Handle::outcome`] or by awaiting the handle. Awaiting never blocks:
/// handles are only yielded after resolution.
#[must_use = "a handle carries the work item's outcome, including any failure"]
#[derive(Debug)]
pub struct Handle<T> {
    index: usize,
    elapsed: Duration,
    outcome: Result<T, HandleError>,
}

impl<T> Handle<T> {
    pub(crate) fn new(index: usize, elapsed: Duration, outcome: Result<T, HandleError>) -> Self {
        Self {
            index,
            elapsed,
            outcome,
        }
    }

    /// Zero-based position of the work item in the producer's pull order.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Time from submission to resolution.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// True if the item ran to completion (its own output may still be an error).
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn outcome(&self) -> Result<&T, &HandleError> {
        self.outcome.as_ref()
    }

    pub fn into_result(self) -> Result<T, HandleError> {
        self.outcome
    }
}

impl<T> IntoFuture for Handle<T> {
    type Output = Result<T, HandleError>;
    type IntoFuture = Ready<Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        ready(self.outcome)
    }
}
