//! Resource cache and change notifications.
//!
//! This crate is the controller's view of the outside world:
//!
//! - **Notifications**: `Added`, `Updated` and `Deleted` signals with a pure
//!   key-extraction function
//! - **Store**: an in-memory cache keyed by [`ObjectKey`], read through a
//!   synchronous [`Lister`]
//! - **Informer**: publishes notifications to subscribers, tracks whether the
//!   initial listing has completed, and drives periodic resyncs
//!
//! # Example
//!
//! ```ignore
//! use steward_core::ObjectMeta;
//! use steward_informer::Informer;
//!
//! #[tokio::main]
//! async fn main() {
//!     let informer = Informer::<ObjectMeta>::new();
//!     let mut sub = informer.subscribe();
//!
//!     informer.replace(vec![ObjectMeta::new("default", "foo")]);
//!     assert!(informer.has_synced());
//!
//!     if let Ok(notification) = sub.recv().await {
//!         println!("{}", notification.kind());
//!     }
//! }
//! ```
//!
//! [`ObjectKey`]: steward_core::ObjectKey

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod informer;
pub mod notification;
pub mod store;

// Re-export main types
pub use informer::{CacheSync, Informer, NotificationStream, RecvError};
pub use notification::{DeletedObject, Notification, NotificationKind};
pub use store::{Lister, Store};
