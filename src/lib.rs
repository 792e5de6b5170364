#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # steward
//!
//! Level-triggered reconciliation controller.
//!
//! This library re-exports the steward workspace crates and holds the pieces
//! of the `steward` binary: CLI, manifest loading and the sample reconciler.

pub use steward_core;
pub use steward_informer;
pub use steward_reconciler;

pub mod cli;
pub mod manifest;
pub mod sample;
