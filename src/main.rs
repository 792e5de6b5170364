//! # steward - controller entry point
//!
//! ## Startup
//!
//! 1. **Configuration** - TOML file plus CLI overrides
//! 2. **Informer** - in-memory cache with change notifications
//! 3. **Controller** - subscribes to the informer before the listing lands
//! 4. **Initial listing** - manifest objects replace the cache and mark it synced
//! 5. **Run** - workers reconcile until SIGINT/SIGTERM, then drain
//!
//! ## Error Handling
//!
//! Only startup failures end the process with an error. Reconcile failures
//! are logged and retried by the workers.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use steward::cli::Cli;
use steward::manifest;
use steward::sample::{SampleResource, SpecLogger};
use steward_informer::Informer;
use steward_reconciler::{Controller, install_signal_handlers, stop_channel};

#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();
    init_tracing();

    let cli = Cli::parse();
    let config = cli
        .controller_config()
        .context("Failed to load controller configuration")?;
    let objects = match &cli.manifest {
        Some(path) => manifest::load(path)?,
        None => Vec::new(),
    };
    info!(
        controller = %config.name,
        workers = config.workers,
        objects = objects.len(),
        "steward starting"
    );

    let informer = Arc::new(Informer::<SampleResource>::new());
    let controller = Controller::new(
        config.name.clone(),
        Arc::clone(&informer),
        SpecLogger::new(informer.lister()),
        config.clone(),
    );

    let (handle, stop) = stop_channel();
    let _signals = install_signal_handlers(handle);

    let resync = config.resync_period().map(|period| {
        let stop = stop.clone();
        informer.spawn_resync(period, async move { stop.wait().await })
    });

    informer.replace(objects);

    controller
        .run(config.workers, stop)
        .await
        .context("Controller failed to start")?;

    if let Some(resync) = resync {
        resync.await.context("Resync task failed")?;
    }

    info!(
        uptime_secs = start_time.elapsed().as_secs(),
        "steward stopped"
    );
    Ok(())
}

/// Initialize tracing with env filter, defaulting to `info`.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
