//! Bounded concurrent relay.
//!
//! Pulls work items from a producer stream, runs up to `max_concurrent` of
//! them at once inside a [`TaskScope`], and yields a [`Handle`] for each one
//! in the order they resolve.
//!
//! State flow:
//! 1. `Filling`: pull and submit until the window is full or the producer ends
//! 2. Window full: wait for at least one item, buffer every resolved item,
//!    hand them out one per poll, then go back to pulling
//! 3. `Draining`: producer ended, hand out the rest in resolution order
//! 4. `Exhausted`: everything handed out, producer and scope released
//!
//! `Closed` and `Failed` are terminal states reached through [`Relay::close`]
//! or a relay-fatal error.
//!
//! The relay is demand-driven: nothing is pulled until the caller polls.
//! Submitted items run on their own regardless of polling, so a caller that
//! stops consuming must call [`Relay::close`]. Dropping an unclosed relay
//! aborts everything still running, and logs a warning.

use std::collections::VecDeque;
use std::future::IntoFuture;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures::Stream;
use futures::stream::FusedStream;
use serde::Serialize;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::config::{RelayConfig, RelayId};
use crate::error::RelayError;
use crate::handle::Handle;
use crate::scope::TaskScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayState {
    Filling,
    Draining,
    Exhausted,
    Closed,
    Failed,
}

impl RelayState {
    fn is_active(&self) -> bool {
        matches!(self, Self::Filling | Self::Draining)
    }
}

/// Point-in-time counters for a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub max_concurrent: usize,
    /// Work items pulled from the producer and submitted.
    pub submitted: usize,
    /// Handles handed to the caller.
    pub yielded: usize,
    /// Submitted items not yet resolved.
    pub in_flight: usize,
    /// Resolved items waiting to be handed out.
    pub buffered: usize,
    pub peak_in_flight: usize,
}

/// Run every work item from `producer` with at most `max_concurrent` in
/// flight, yielding handles in completion order.
///
/// Work items are anything implementing [`IntoFuture`]; wrap plain values
/// with [`std::future::ready`]. Must be called inside a tokio runtime.
pub fn relay<S, T>(producer: S, max_concurrent: usize) -> Result<Relay<S, T>, RelayError>
where
    S: Stream,
    S::Item: IntoFuture<Output = T>,
    <S::Item as IntoFuture>::IntoFuture: Send + 'static,
    T: Send + 'static,
{
    Relay::with_config(producer, RelayConfig::new(max_concurrent)?)
}

/// Stream returned by [`relay`].
///
/// Yields `Ok(handle)` for each work item, or a single `Err` if the relay
/// fails, after which the stream ends.
#[must_use = "streams do nothing unless polled"]
pub struct Relay<S, T> {
    id: RelayId,
    config: RelayConfig,
    producer: Option<Pin<Box<S>>>,
    scope: TaskScope<T>,
    ready: VecDeque<Handle<T>>,
    state: RelayState,
    caller_cancelled: Option<Pin<Box<WaitForCancellationFutureOwned>>>,
    submitted: usize,
    yielded: usize,
    peak_in_flight: usize,
}

// Neither the producer (boxed) nor the outputs are ever pinned in place.
impl<S, T> Unpin for Relay<S, T> {}

impl<S, T> Relay<S, T>
where
    S: Stream,
    S::Item: IntoFuture<Output = T>,
    <S::Item as IntoFuture>::IntoFuture: Send + 'static,
    T: Send + 'static,
{
    pub fn with_config(producer: S, config: RelayConfig) -> Result<Self, RelayError> {
        Self::build(producer, config, TaskScope::new()?, None)
    }

    /// Like [`Relay::with_config`], but the relay fails with
    /// [`RelayError::Cancelled`] and cancels all of its work once `token` fires.
    pub fn with_cancellation(
        producer: S,
        config: RelayConfig,
        token: &CancellationToken,
    ) -> Result<Self, RelayError> {
        let scope = TaskScope::with_parent(token)?;
        let watcher = Box::pin(token.clone().cancelled_owned());
        Self::build(producer, config, scope, Some(watcher))
    }

    fn build(
        producer: S,
        config: RelayConfig,
        scope: TaskScope<T>,
        caller_cancelled: Option<Pin<Box<WaitForCancellationFutureOwned>>>,
    ) -> Result<Self, RelayError> {
        let id = RelayId::new();
        tracing::debug!(
            relay = %id,
            label = ?config.label,
            max_concurrent = config.max_concurrent.get(),
            "Relay created"
        );
        Ok(Self {
            id,
            config,
            producer: Some(Box::pin(producer)),
            scope,
            ready: VecDeque::new(),
            state: RelayState::Filling,
            caller_cancelled,
            submitted: 0,
            yielded: 0,
            peak_in_flight: 0,
        })
    }

    fn submit(&mut self, item: S::Item) {
        let index = self.submitted;
        self.submitted += 1;
        self.scope.spawn(index, item.into_future());

        let in_flight = self.scope.len();
        self.peak_in_flight = self.peak_in_flight.max(in_flight);
        tracing::debug!(relay = %self.id, index, in_flight, "Submitted work item");
    }

    /// Wait for at least one item to resolve, then buffer every item that
    /// has already resolved.
    fn poll_harvest(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), RelayError>> {
        match ready!(self.scope.poll_join_next(cx)) {
            Some(Ok(handle)) => self.ready.push_back(handle),
            Some(Err(e)) => return Poll::Ready(Err(e)),
            None => return Poll::Ready(Ok(())),
        }
        while let Poll::Ready(Some(joined)) = self.scope.poll_join_next(cx) {
            match joined {
                Ok(handle) => self.ready.push_back(handle),
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
        tracing::trace!(
            relay = %self.id,
            resolved = self.ready.len(),
            in_flight = self.scope.len(),
            "Harvested resolved work items"
        );
        Poll::Ready(Ok(()))
    }

    /// Tear everything down after a relay-fatal error.
    fn fail(&mut self, error: RelayError) -> RelayError {
        let cancelled = self.scope.cancel();
        self.producer = None;
        self.ready.clear();
        self.state = RelayState::Failed;
        match &error {
            RelayError::Scope(_) => {
                tracing::error!(relay = %self.id, label = ?self.config.label, cancelled, error = %error, "Relay failed");
            }
            _ => {
                tracing::warn!(relay = %self.id, label = ?self.config.label, cancelled, error = %error, "Relay cancelled");
            }
        }
        error
    }

    fn is_caller_cancelled(&mut self, cx: &mut Context<'_>) -> bool {
        self.caller_cancelled
            .as_mut()
            .is_some_and(|watcher| watcher.as_mut().poll(cx).is_ready())
    }

    /// Stop the relay early: cancel every in-flight item, wait for all of
    /// them to stop, and release the producer.
    ///
    /// Resolved handles not yet handed out are discarded. Returns the number
    /// of work items that were cancelled. Calling `close` on a finished relay
    /// is a no-op.
    pub async fn close(&mut self) -> usize {
        let was_active = self.state.is_active();
        let discarded = self.ready.len();
        self.ready.clear();
        self.producer = None;
        if was_active {
            self.state = RelayState::Closed;
        }
        let cancelled = self.scope.shutdown().await;
        if !was_active {
            return 0;
        }

        tracing::info!(
            relay = %self.id,
            label = ?self.config.label,
            cancelled,
            discarded,
            yielded = self.yielded,
            "Relay closed"
        );
        cancelled
    }
}

impl<S, T> Relay<S, T> {
    pub fn id(&self) -> RelayId {
        self.id
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            max_concurrent: self.config.max_concurrent.get(),
            submitted: self.submitted,
            yielded: self.yielded,
            in_flight: self.scope.len(),
            buffered: self.ready.len(),
            peak_in_flight: self.peak_in_flight,
        }
    }
}

impl<S, T> Stream for Relay<S, T>
where
    S: Stream,
    S::Item: IntoFuture<Output = T>,
    <S::Item as IntoFuture>::IntoFuture: Send + 'static,
    T: Send + 'static,
{
    type Item = Result<Handle<T>, RelayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.state.is_active() && this.is_caller_cancelled(cx) {
                return Poll::Ready(Some(Err(this.fail(RelayError::Cancelled))));
            }

            if let Some(handle) = this.ready.pop_front() {
                this.yielded += 1;
                tracing::trace!(relay = %this.id, index = handle.index(), "Yielding handle");
                return Poll::Ready(Some(Ok(handle)));
            }

            match this.state {
                RelayState::Exhausted | RelayState::Closed | RelayState::Failed => {
                    return Poll::Ready(None);
                }
                RelayState::Filling if this.scope.len() < this.config.max_concurrent.get() => {
                    let Some(producer) = this.producer.as_mut() else {
                        this.state = RelayState::Draining;
                        continue;
                    };
                    match producer.as_mut().poll_next(cx) {
                        Poll::Ready(Some(item)) => this.submit(item),
                        Poll::Ready(None) => {
                            this.producer = None;
                            this.state = RelayState::Draining;
                            tracing::debug!(
                                relay = %this.id,
                                submitted = this.submitted,
                                in_flight = this.scope.len(),
                                "Producer exhausted, draining"
                            );
                        }
                        Poll::Pending => return Poll::Pending,
                    }
                }
                RelayState::Filling | RelayState::Draining => {
                    if this.scope.is_empty() {
                        this.state = RelayState::Exhausted;
                        tracing::debug!(
                            relay = %this.id,
                            yielded = this.yielded,
                            "Relay exhausted"
                        );
                        return Poll::Ready(None);
                    }
                    if let Err(e) = ready!(this.poll_harvest(cx)) {
                        return Poll::Ready(Some(Err(this.fail(e))));
                    }
                }
            }
        }
    }
}

impl<S, T> FusedStream for Relay<S, T>
where
    S: Stream,
    S::Item: IntoFuture<Output = T>,
    <S::Item as IntoFuture>::IntoFuture: Send + 'static,
    T: Send + 'static,
{
    fn is_terminated(&self) -> bool {
        !self.state.is_active() && self.ready.is_empty()
    }
}

impl<S, T> Drop for Relay<S, T> {
    fn drop(&mut self) {
        if self.state.is_active() && (!self.scope.is_empty() || !self.ready.is_empty()) {
            tracing::warn!(
                relay = %self.id,
                label = ?self.config.label,
                in_flight = self.scope.len(),
                "Relay dropped without close - aborting in-flight work"
            );
        }
    }
}

impl<S, T> std::fmt::Debug for Relay<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("state", &self.state)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Adds [`relay`](RelayStreamExt::relay) to every stream of work items.
pub trait RelayStreamExt: Stream + Sized {
    /// See [`relay`](crate::relay()).
    fn relay<T>(self, max_concurrent: usize) -> Result<Relay<Self, T>, RelayError>
    where
        Self::Item: IntoFuture<Output = T>,
        <Self::Item as IntoFuture>::IntoFuture: Send + 'static,
        T: Send + 'static,
    {
        self::relay(self, max_concurrent)
    }
}

impl<S: Stream> RelayStreamExt for S {}
