//! Controller configuration loaded from TOML.
//!
//! Every field has a default, so an empty file is a valid configuration:
//!
//! ```toml
//! name = "submarines"
//! workers = 4
//! base_delay_ms = 5
//! max_delay_ms = 1000000
//! max_retries = 15
//! sync_timeout_ms = 60000
//! resync_period_ms = 30000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Settings for one controller instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Controller name, used in logs.
    pub name: String,
    /// Number of concurrent reconcile workers.
    pub workers: usize,
    /// Per-key backoff for the first failure, in milliseconds.
    pub base_delay_ms: u64,
    /// Per-key backoff cap, in milliseconds.
    pub max_delay_ms: u64,
    /// Overall requeue rate shared by all keys.
    pub bucket_qps: u32,
    /// Overall requeue burst shared by all keys.
    pub bucket_burst: u32,
    /// Consecutive retriable failures tolerated before a key is dropped.
    pub max_retries: u32,
    /// Bound on the startup wait for the cache to sync, in milliseconds.
    pub sync_timeout_ms: u64,
    /// Interval between full resyncs, in milliseconds. Disabled when unset.
    pub resync_period_ms: Option<u64>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: "steward".to_string(),
            workers: 2,
            base_delay_ms: 5,
            max_delay_ms: 1_000_000,
            bucket_qps: 10,
            bucket_burst: 100,
            max_retries: 15,
            sync_timeout_ms: 60_000,
            resync_period_ms: None,
        }
    }
}

impl ControllerConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TomlParseFailed`] on malformed TOML and
    /// [`Error::InvalidConfig`] when validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| Error::toml_parse_failed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigReadFailed`] if the file cannot be read, and the
    /// errors of [`Self::from_toml_str`] otherwise.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading controller config");
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config_read_failed(path, e.to_string()))?;
        Self::from_toml_str(&raw)
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_config("workers must be at least 1"));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::invalid_config(format!(
                "base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if self.bucket_qps == 0 || self.bucket_burst == 0 {
            return Err(Error::invalid_config(
                "bucket_qps and bucket_burst must be positive",
            ));
        }
        if self.sync_timeout_ms == 0 {
            return Err(Error::invalid_config("sync_timeout_ms must be positive"));
        }
        if self.resync_period_ms == Some(0) {
            return Err(Error::invalid_config("resync_period_ms must be positive"));
        }
        Ok(())
    }

    /// Set the worker count.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the per-key backoff bounds.
    #[must_use]
    pub const fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay_ms = duration_ms(base);
        self.max_delay_ms = duration_ms(max);
        self
    }

    /// Set the retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the startup sync bound.
    #[must_use]
    pub const fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout_ms = duration_ms(timeout);
        self
    }

    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    #[must_use]
    pub const fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    #[must_use]
    pub fn resync_period(&self) -> Option<Duration> {
        self.resync_period_ms.map(Duration::from_millis)
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn duration_ms(duration: Duration) -> u64 {
    // Saturate instead of wrapping for absurdly large durations.
    let ms = duration.as_millis();
    if ms > u64::MAX as u128 {
        u64::MAX
    } else {
        ms as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = ControllerConfig::from_toml_str("");
        assert_eq!(config.ok(), Some(ControllerConfig::default()));
    }

    #[test]
    fn test_partial_document_overrides() {
        let config = ControllerConfig::from_toml_str("workers = 8\nresync_period_ms = 500").ok();
        assert_eq!(config.as_ref().map(|c| c.workers), Some(8));
        assert_eq!(
            config.and_then(|c| c.resync_period()),
            Some(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = ControllerConfig::from_toml_str("workers = 0");
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_base_above_max_rejected() {
        let config = ControllerConfig::default()
            .with_backoff(Duration::from_secs(10), Duration::from_secs(1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let result = ControllerConfig::from_toml_str("workers = [");
        assert!(matches!(result, Err(Error::TomlParseFailed { .. })));
    }

    #[test]
    fn test_from_file() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("steward.toml");
        std::fs::write(&path, "name = \"submarines\"\nmax_retries = 3\n")?;

        let config = ControllerConfig::from_file(&path)?;
        assert_eq!(config.name, "submarines");
        assert_eq!(config.max_retries, 3);
        Ok(())
    }

    #[test]
    fn test_missing_file() {
        let result = ControllerConfig::from_file("/definitely/not/here.toml");
        assert!(matches!(result, Err(Error::ConfigReadFailed { .. })));
    }
}
