//! Stop signalling for controllers.
//!
//! [`stop_channel`] returns a [`StopHandle`] that requests the stop and a
//! [`StopSignal`] that observes it. The first request wins and its reason is
//! kept. Dropping every handle counts as a stop.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Why a stop was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM received
    Sigterm,
    /// SIGINT received (Ctrl+C)
    Sigint,
    /// Requested from code
    Programmatic,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sigterm => write!(f, "SIGTERM"),
            Self::Sigint => write!(f, "SIGINT"),
            Self::Programmatic => write!(f, "PROGRAMMATIC"),
        }
    }
}

/// Create a connected stop handle and signal.
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(None);
    (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
}

/// Requests a stop.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<Option<ShutdownSignal>>>,
}

impl StopHandle {
    /// Request a programmatic stop.
    pub fn stop(&self) -> bool {
        self.stop_with(ShutdownSignal::Programmatic)
    }

    /// Request a stop for `reason`. Returns `false` if one was already
    /// requested, in which case the first reason is kept.
    pub fn stop_with(&self, reason: ShutdownSignal) -> bool {
        let first = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if first {
            info!(reason = %reason, "Stop requested");
        }
        first
    }

    /// Another observer of this handle's stop.
    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observes a stop request.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<Option<ShutdownSignal>>,
}

impl StopSignal {
    /// Whether a stop was requested or every handle was dropped.
    pub fn is_stopped(&self) -> bool {
        self.rx.borrow().is_some() || self.rx.has_changed().is_err()
    }

    /// The requested reason, if any.
    pub fn reason(&self) -> Option<ShutdownSignal> {
        *self.rx.borrow()
    }

    /// Resolve once stopped.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        while rx.borrow_and_update().is_none() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Turn SIGTERM and SIGINT into a stop on `handle`.
pub fn install_signal_handlers(handle: StopHandle) -> JoinHandle<()> {
    info!("Installing OS signal handlers");

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    return;
                }
            };

            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Failed to install SIGINT handler");
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => {
                    handle.stop_with(ShutdownSignal::Sigterm);
                }
                _ = sigint.recv() => {
                    handle.stop_with(ShutdownSignal::Sigint);
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }
            handle.stop_with(ShutdownSignal::Sigint);
        }
    })
}
