//! Core types for the reconciler.

use std::fmt;
use std::time::Duration;

use steward_core::ObjectKey;
use thiserror::Error;

/// Why a reconcile did not converge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// The resource vanished between enqueue and processing.
    #[error("resource '{key}' no longer exists")]
    NotFound { key: ObjectKey },

    #[error("reconcile failed: {reason}")]
    Failed { reason: String },

    /// The reconcile function panicked; the panic was contained.
    #[error("reconcile panicked: {message}")]
    Panicked { message: String },
}

impl ReconcileError {
    /// Create a not found error.
    pub const fn not_found(key: ObjectKey) -> Self {
        Self::NotFound { key }
    }

    /// Create a failed error.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Create a panicked error.
    pub fn panicked(message: impl Into<String>) -> Self {
        Self::Panicked {
            message: message.into(),
        }
    }

    /// Whether this error means the resource is gone.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result of one reconcile call, interpreted by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Converged. Backoff is reset.
    Success,
    /// Converged for now; reconcile again after the delay. Backoff is reset.
    RequeueAfter(Duration),
    /// Try again with backoff, until the retry budget is spent.
    Retriable(ReconcileError),
    /// Do not retry. Backoff is reset.
    Terminal(ReconcileError),
}

impl Outcome {
    /// Retriable failure with a reason.
    pub fn retriable(reason: impl Into<String>) -> Self {
        Self::Retriable(ReconcileError::failed(reason))
    }

    /// Terminal failure with a reason.
    pub fn terminal(reason: impl Into<String>) -> Self {
        Self::Terminal(ReconcileError::failed(reason))
    }

    /// The resource no longer exists.
    pub const fn not_found(key: ObjectKey) -> Self {
        Self::Terminal(ReconcileError::not_found(key))
    }

    /// Whether the outcome counts as converged.
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::RequeueAfter(_))
    }
}

impl From<Result<(), ReconcileError>> for Outcome {
    /// `NotFound` is terminal; every other error is retriable.
    fn from(result: Result<(), ReconcileError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(e @ ReconcileError::NotFound { .. }) => Self::Terminal(e),
            Err(e) => Self::Retriable(e),
        }
    }
}

/// Controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerState {
    /// Constructed, `run` not called yet.
    Created,
    /// Waiting for the cache's initial listing.
    Syncing,
    /// Workers active.
    Running,
    /// Stop signalled; in-flight and pending work completing.
    Draining,
    /// All workers exited and the queue is shut down.
    Stopped,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Syncing => write!(f, "syncing"),
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_result() {
        let key = ObjectKey::parse("ns/foo").ok();
        assert_eq!(Outcome::from(Ok(())), Outcome::Success);
        assert!(matches!(
            Outcome::from(Err(ReconcileError::failed("timeout"))),
            Outcome::Retriable(_)
        ));
        if let Some(key) = key {
            assert!(matches!(
                Outcome::from(Err(ReconcileError::not_found(key))),
                Outcome::Terminal(ReconcileError::NotFound { .. })
            ));
        }
    }

    #[test]
    fn test_error_display() {
        let err = ReconcileError::failed("dependency unavailable");
        assert!(err.to_string().contains("dependency unavailable"));
    }

    #[test]
    fn test_requeue_after_is_success() {
        assert!(Outcome::RequeueAfter(Duration::from_secs(1)).is_success());
        assert!(!Outcome::retriable("x").is_success());
    }
}
