//! turbopipes: run a stream of futures with bounded concurrency.
//!
//! [`relay`] keeps a rolling window of at most N work items in flight and
//! yields a [`Handle`] for each one as soon as it resolves, in completion
//! order. Failures stay inside the handle until the caller looks at it.
//!
//! ```no_run
//! use futures::{StreamExt, stream};
//! use turbopipes::RelayStreamExt;
//!
//! async fn double(index: u64) -> u64 {
//!     tokio::time::sleep(std::time::Duration::from_millis(index % 7)).await;
//!     index * 2
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut relay = stream::iter(0..50).map(double).relay(10)?;
//! while let Some(handle) = relay.next().await {
//!     println!("{}", handle?.await?);
//! }
//! relay.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! A caller that stops early must call [`Relay::close`]; dropping the relay
//! instead aborts outstanding work without waiting for it.

mod config;
mod error;
mod handle;
mod relay;
mod scope;

pub use config::{RelayConfig, RelayId};
pub use error::{HandleError, RelayError};
pub use handle::Handle;
pub use relay::{Relay, RelayStats, RelayStreamExt, relay};
pub use scope::TaskScope;
pub use tokio_util::sync::CancellationToken;
