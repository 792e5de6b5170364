//! Error types for the reconciler crate.

use std::fmt;

use crate::types::ControllerState;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
///
/// Only startup failures surface here; steady-state reconcile failures are
/// handled inside the worker loop.
#[derive(Debug)]
pub enum Error {
    /// The cache did not report synced within the startup bound.
    CacheSyncFailed { controller: String, timeout_ms: u64 },
    /// Stop was signalled while waiting for the cache to sync.
    CacheSyncAborted { controller: String },
    /// `run` was called on a controller that is not in the created state.
    AlreadyRunning { state: ControllerState },
    /// Invalid configuration.
    InvalidConfig { reason: String },
    /// Core error.
    Core(steward_core::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CacheSyncFailed {
                controller,
                timeout_ms,
            } => {
                write!(
                    f,
                    "controller '{controller}' failed to wait for caches to sync within {timeout_ms}ms"
                )
            }
            Self::CacheSyncAborted { controller } => {
                write!(f, "controller '{controller}' stopped before caches synced")
            }
            Self::AlreadyRunning { state } => {
                write!(f, "controller cannot run from state '{state}'")
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid configuration: {reason}")
            }
            Self::Core(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Core(err) => Some(err),
            _ => None,
        }
    }
}

impl From<steward_core::Error> for Error {
    fn from(err: steward_core::Error) -> Self {
        match err {
            steward_core::Error::InvalidConfig { reason } => Self::InvalidConfig { reason },
            other => Self::Core(other),
        }
    }
}

impl Error {
    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether this is a startup sync failure (timeout or abort).
    pub const fn is_sync_failure(&self) -> bool {
        matches!(
            self,
            Self::CacheSyncFailed { .. } | Self::CacheSyncAborted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::CacheSyncFailed {
            controller: "submarines".to_string(),
            timeout_ms: 500,
        };
        assert!(err.to_string().contains("submarines"));
        assert!(err.to_string().contains("500ms"));
        assert!(err.is_sync_failure());
    }

    #[test]
    fn test_core_error_source() {
        let err = Error::from(steward_core::Error::malformed_key("a/b/c", "too many segments"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_sync_failure());
    }

    #[test]
    fn test_core_invalid_config_maps_to_invalid_config() {
        let err = Error::from(steward_core::Error::invalid_config("sync_timeout_ms must be positive"));
        assert!(matches!(
            err,
            Error::InvalidConfig { ref reason } if reason == "sync_timeout_ms must be positive"
        ));
    }
}
