//! CLI definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::Parser;
use steward_core::ControllerConfig;

/// steward - level-triggered reconciliation controller
#[derive(Parser, Debug)]
#[command(name = "steward")]
#[command(version)]
#[command(about = "Reconcile declared resources with a deduplicating, rate-limited work queue")]
#[command(
    long_about = "steward loads resources from a YAML manifest into an in-memory cache, waits for the cache to sync, and reconciles every resource with a pool of workers until SIGINT or SIGTERM."
)]
pub struct Cli {
    /// Controller configuration file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Resources to load as the initial listing (YAML)
    #[arg(short, long)]
    pub manifest: Option<PathBuf>,

    /// Number of reconcile workers, overriding the config file
    #[arg(short, long)]
    pub workers: Option<usize>,
}

impl Cli {
    /// Build the controller configuration: file values first, then flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if
    /// the merged configuration is invalid.
    pub fn controller_config(&self) -> steward_core::Result<ControllerConfig> {
        let config = match &self.config {
            Some(path) => ControllerConfig::from_file(path)?,
            None => ControllerConfig::default(),
        };
        let config = match self.workers {
            Some(workers) => config.with_workers(workers),
            None => config,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from(["steward", "--manifest", "objects.yaml", "-w", "4"]).ok();
        assert_eq!(cli.as_ref().and_then(|c| c.workers), Some(4));
        assert_eq!(
            cli.and_then(|c| c.manifest),
            Some(PathBuf::from("objects.yaml"))
        );
    }

    #[test]
    fn test_workers_flag_overrides_default() {
        let cli = Cli {
            config: None,
            manifest: None,
            workers: Some(7),
        };
        assert_eq!(cli.controller_config().ok().map(|c| c.workers), Some(7));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let cli = Cli {
            config: None,
            manifest: None,
            workers: Some(0),
        };
        assert!(cli.controller_config().is_err());
    }
}
