//! Level-triggered reconciliation engine.
//!
//! A [`Controller`] watches an informer, turns every notification into the
//! [`ObjectKey`](steward_core::ObjectKey) of the object it concerns, and feeds
//! those keys through a deduplicating [`WorkQueue`] to a pool of workers that
//! call a [`Reconcile`] implementation.
//!
//! # Key Concepts
//!
//! ## Level-triggered
//!
//! Workers only receive a key, never the event that caused it. Reconciling
//! always re-reads the current state and converges it, so a burst of updates
//! collapses into one reconcile and a missed event is healed by the next one.
//!
//! ## Queue guarantees
//!
//! - A key is never reconciled by two workers at once
//! - A key added while it is being reconciled is reconciled again afterwards
//! - Failed keys come back with per-key exponential backoff
//!
//! ## Outcomes
//!
//! - `Success` - forget the key's retry history
//! - `RequeueAfter` - success, reconcile again later
//! - `Retriable` - back off and retry, up to `max_retries`
//! - `Terminal` - log and drop; `NotFound` means the object is gone
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use steward_core::{ControllerConfig, ObjectKey, ObjectMeta};
//! use steward_informer::Informer;
//! use steward_reconciler::{Controller, Outcome, stop_channel};
//!
//! #[tokio::main]
//! async fn main() -> steward_reconciler::Result<()> {
//!     let informer = Arc::new(Informer::<ObjectMeta>::new());
//!     let controller = Controller::new(
//!         "demo",
//!         Arc::clone(&informer),
//!         |key: ObjectKey| async move { Outcome::Success },
//!         ControllerConfig::default(),
//!     );
//!
//!     informer.replace(vec![ObjectMeta::new("default", "example")]);
//!     let (handle, stop) = stop_channel();
//!     // handle.stop() from elsewhere to drain and return
//!     controller.run(2, stop).await
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod controller;
pub mod error;
pub mod queue;
pub mod rate_limiter;
pub mod reconciler;
pub mod shutdown;
pub mod types;
mod worker;

// Re-export main types
pub use controller::Controller;
pub use error::{Error, Result};
pub use queue::{QueueStats, WorkQueue};
pub use rate_limiter::{
    BucketRateLimiter, ItemExponentialFailureRateLimiter, MaxOfRateLimiter, RateLimiter,
    default_controller_rate_limiter, exponential_backoff,
};
pub use reconciler::Reconcile;
pub use shutdown::{
    ShutdownSignal, StopHandle, StopSignal, install_signal_handlers, stop_channel,
};
pub use types::{ControllerState, Outcome, ReconcileError};
