//! Core types shared by every steward crate.
//!
//! - [`ObjectKey`]: the namespace/name identity of a resource, used by the
//!   work queue for deduplication
//! - [`Resource`] and [`ObjectMeta`]: the only view of an object the engine
//!   ever needs
//! - [`ControllerConfig`]: worker, backoff and sync settings loaded from TOML
//! - [`Error`]: the core error type

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod error;
pub mod key;
pub mod meta;

pub use config::ControllerConfig;
pub use error::{Error, Result};
pub use key::ObjectKey;
pub use meta::{ObjectMeta, Resource};
