//! Supervision scope - owns every work item the relay submits.
//!
//! Each submitted item runs as its own tokio task inside a `JoinSet`. A
//! shared `CancellationToken` lets the whole scope be cancelled at once:
//! - `cancel()` fires the token and aborts every task (abrupt, no grace period)
//! - `shutdown()` does the same and then joins every task
//! - dropping the scope fires the token; the `JoinSet` aborts the rest
//!
//! Panics inside a work item are caught and reported through the item's
//! handle, so one item can never take down its siblings.

use std::future::{Future, poll_fn};
use std::panic::AssertUnwindSafe;
use std::task::{Context, Poll, ready};
use std::time::Instant;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{HandleError, RelayError, panic_message};
use crate::handle::Handle;

pub struct TaskScope<T> {
    tasks: JoinSet<Handle<T>>,
    token: CancellationToken,
    runtime: tokio::runtime::Handle,
}

impl<T> TaskScope<T> {
    /// Number of tasks not yet joined.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token shared by every task in this scope.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl<T: Send + 'static> TaskScope<T> {
    /// Open a scope on the current tokio runtime.
    pub fn new() -> Result<Self, RelayError> {
        Self::with_token(CancellationToken::new())
    }

    /// Open a scope that is also cancelled when `parent` is.
    pub fn with_parent(parent: &CancellationToken) -> Result<Self, RelayError> {
        Self::with_token(parent.child_token())
    }

    fn with_token(token: CancellationToken) -> Result<Self, RelayError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| RelayError::NoRuntime)?;
        Ok(Self {
            tasks: JoinSet::new(),
            token,
            runtime,
        })
    }

    /// Start `work` immediately as a supervised task.
    pub fn spawn<F>(&mut self, index: usize, work: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let token = self.token.clone();
        let submitted = Instant::now();
        self.tasks.spawn_on(
            async move {
                // The item is polled and dropped inside the guard, so a panic
                // from its destructor stays with this item.
                let mut output = None;
                let caught = AssertUnwindSafe(async {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {}
                        out = work => output = Some(out),
                    }
                })
                .catch_unwind()
                .await;

                let outcome = match (output, caught) {
                    (Some(value), Ok(())) => Ok(value),
                    (Some(value), Err(payload)) => {
                        tracing::warn!(
                            index,
                            panic = panic_message(payload.as_ref()),
                            "Work item panicked while being dropped after completing"
                        );
                        Ok(value)
                    }
                    (None, Err(payload)) => Err(HandleError::Panicked(payload)),
                    (None, Ok(())) => Err(HandleError::Cancelled),
                };
                Handle::new(index, submitted.elapsed(), outcome)
            },
            &self.runtime,
        );
    }

    /// Poll for the next resolved task, in resolution order.
    ///
    /// `Ready(None)` means the scope is empty. A task that ended without
    /// returning its handle (aborted from outside, runtime shutting down) is
    /// a scope defect and comes back as `RelayError::Scope`.
    pub fn poll_join_next(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Handle<T>, RelayError>>> {
        let joined = ready!(self.tasks.poll_join_next(cx));
        Poll::Ready(joined.map(|result| result.map_err(|e| RelayError::Scope(e.to_string()))))
    }

    pub async fn join_next(&mut self) -> Option<Result<Handle<T>, RelayError>> {
        poll_fn(|cx| self.poll_join_next(cx)).await
    }

    /// Cancel every task. Returns how many were still unjoined.
    pub fn cancel(&mut self) -> usize {
        let remaining = self.tasks.len();
        self.token.cancel();
        self.tasks.abort_all();
        if remaining > 0 {
            tracing::debug!(remaining, "Cancelled supervised tasks");
        }
        remaining
    }

    /// Cancel every task and wait until all of them have stopped.
    pub async fn shutdown(&mut self) -> usize {
        let remaining = self.cancel();
        while self.tasks.join_next().await.is_some() {}
        remaining
    }
}

impl<T> Drop for TaskScope<T> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
