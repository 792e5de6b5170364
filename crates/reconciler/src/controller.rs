//! Controller: informer notifications in, reconciles out.
//!
//! ```text
//! Created -> Syncing -> Running -> Draining -> Stopped
//!               |
//!               +--> Stopped (sync timed out or stop during sync)
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use steward_core::{ControllerConfig, ObjectKey, Resource};
use steward_informer::{CacheSync, Informer, Lister, NotificationStream, RecvError};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::queue::WorkQueue;
use crate::rate_limiter::default_controller_rate_limiter;
use crate::reconciler::Reconcile;
use crate::shutdown::StopSignal;
use crate::types::ControllerState;
use crate::worker::Worker;

/// Runs a [`Reconcile`] implementation against an informer's objects.
pub struct Controller<T> {
    name: Arc<str>,
    config: ControllerConfig,
    informer: Arc<Informer<T>>,
    reconciler: Arc<dyn Reconcile>,
    queue: WorkQueue<ObjectKey>,
    notifications: Mutex<Option<NotificationStream<T>>>,
    state: watch::Sender<ControllerState>,
}

impl<T> Controller<T>
where
    T: Resource + Send + Sync + 'static,
{
    /// Create a controller and subscribe to `informer` right away, so
    /// notifications published before [`Self::run`] are not missed.
    pub fn new(
        name: impl Into<String>,
        informer: Arc<Informer<T>>,
        reconciler: impl Reconcile + 'static,
        config: ControllerConfig,
    ) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        let queue = WorkQueue::new(name.to_string(), default_controller_rate_limiter(&config));
        let notifications = informer.subscribe();
        let (state, _) = watch::channel(ControllerState::Created);
        Self {
            name,
            config,
            informer,
            reconciler: Arc::new(reconciler),
            queue,
            notifications: Mutex::new(Some(notifications)),
            state,
        }
    }

    /// Controller name, used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    /// Observe lifecycle transitions.
    pub fn state_watch(&self) -> watch::Receiver<ControllerState> {
        self.state.subscribe()
    }

    /// The controller's work queue.
    pub fn queue(&self) -> &WorkQueue<ObjectKey> {
        &self.queue
    }

    /// Read-only view of the informer's cache.
    pub fn lister(&self) -> Lister<T> {
        self.informer.lister()
    }

    /// Queue `key` for reconciliation.
    pub fn enqueue(&self, key: ObjectKey) {
        self.queue.add(key);
    }

    /// Queue the key of `object`. Objects without a valid key are logged and
    /// dropped.
    pub fn enqueue_object(&self, object: &T) {
        match object.key() {
            Ok(key) => self.queue.add(key),
            Err(e) => error!(controller = %self.name, error = %e, "Dropping object with malformed key"),
        }
    }

    /// Parse `raw` as `namespace/name` or `name` and queue it. Malformed keys
    /// are logged and dropped, since retrying them cannot succeed.
    pub fn enqueue_raw(&self, raw: &str) {
        match ObjectKey::parse(raw) {
            Ok(key) => self.queue.add(key),
            Err(e) => error!(controller = %self.name, key = raw, error = %e, "Dropping malformed key"),
        }
    }

    fn set_state(&self, next: ControllerState) {
        let previous = self.state.send_replace(next);
        debug!(controller = %self.name, from = %previous, to = %next, "Controller state changed");
    }

    /// Wait for the cache to sync, then reconcile with `workers` concurrent
    /// workers until `stop` fires. In-flight and pending keys are finished
    /// before returning.
    ///
    /// # Errors
    ///
    /// Only startup failures are returned: [`Error::InvalidConfig`] for a zero
    /// worker count or invalid configuration, [`Error::AlreadyRunning`] if
    /// `run` was already called, [`Error::CacheSyncFailed`] if the cache did
    /// not sync within the configured bound and [`Error::CacheSyncAborted`]
    /// if `stop` fired first. Reconcile failures are handled by the workers.
    pub async fn run(&self, workers: usize, stop: StopSignal) -> Result<()> {
        if workers == 0 {
            return Err(Error::invalid_config("workers must be at least 1"));
        }
        self.config.validate()?;

        let mut rejected = None;
        self.state.send_if_modified(|state| {
            if *state != ControllerState::Created {
                rejected = Some(*state);
                return false;
            }
            *state = ControllerState::Syncing;
            true
        });
        if let Some(state) = rejected {
            return Err(Error::AlreadyRunning { state });
        }

        info!(controller = %self.name, "Starting controller");
        let pump = self.spawn_pump(stop.clone());

        info!(controller = %self.name, "Waiting for informer caches to sync");
        if let Err(e) = self.wait_for_sync(&stop).await {
            error!(controller = %self.name, error = %e, "Controller failed to start");
            pump.abort();
            self.queue.shut_down();
            self.set_state(ControllerState::Stopped);
            return Err(e);
        }

        self.set_state(ControllerState::Running);
        let mut pool = JoinSet::new();
        for id in 0..workers {
            pool.spawn(
                Worker {
                    id,
                    controller: Arc::clone(&self.name),
                    queue: self.queue.clone(),
                    reconciler: Arc::clone(&self.reconciler),
                    max_retries: self.config.max_retries,
                }
                .run(),
            );
        }
        info!(controller = %self.name, workers, "Started workers");

        stop.wait().await;

        self.set_state(ControllerState::Draining);
        info!(controller = %self.name, reason = ?stop.reason(), "Shutting down workers");
        if let Err(e) = pump.await {
            warn!(controller = %self.name, error = %e, "Notification pump ended abnormally");
        }
        self.queue.shut_down();
        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                warn!(controller = %self.name, error = %e, "Worker ended abnormally");
            }
        }

        self.set_state(ControllerState::Stopped);
        info!(controller = %self.name, "Controller stopped");
        Ok(())
    }

    async fn wait_for_sync(&self, stop: &StopSignal) -> Result<()> {
        let timeout = self.config.sync_timeout();
        tokio::select! {
            biased;
            () = stop.wait() => Err(Error::CacheSyncAborted {
                controller: self.name.to_string(),
            }),
            synced = self.informer.wait_for_sync(timeout) => {
                if synced {
                    info!(controller = %self.name, "Informer caches synced");
                    Ok(())
                } else {
                    Err(Error::CacheSyncFailed {
                        controller: self.name.to_string(),
                        timeout_ms: self.config.sync_timeout_ms,
                    })
                }
            }
        }
    }

    fn spawn_pump(&self, stop: StopSignal) -> JoinHandle<()> {
        let stream = self
            .notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_else(|| self.informer.subscribe());
        let pump = Pump {
            controller: Arc::clone(&self.name),
            queue: self.queue.clone(),
            lister: self.informer.lister(),
        };
        tokio::spawn(pump.run(stream, stop))
    }
}

/// Turns notifications into queue adds. Add, update and delete all enqueue
/// the same key; the reconciler sees the cache to tell them apart. After a
/// lag every cached key and every unreceived deletion is enqueued.
struct Pump<T> {
    controller: Arc<str>,
    queue: WorkQueue<ObjectKey>,
    lister: Lister<T>,
}

impl<T> Pump<T>
where
    T: Resource + Send + Sync + 'static,
{
    async fn run(self, mut stream: NotificationStream<T>, stop: StopSignal) {
        loop {
            let received = tokio::select! {
                biased;
                () = stop.wait() => break,
                received = stream.recv() => received,
            };
            match received {
                Ok(notification) => match notification.key() {
                    Ok(key) => {
                        debug!(
                            controller = %self.controller,
                            key = %key,
                            kind = %notification.kind(),
                            "Enqueueing from notification"
                        );
                        self.queue.add(key);
                    }
                    Err(e) => error!(
                        controller = %self.controller,
                        error = %e,
                        "Dropping notification with malformed key"
                    ),
                },
                Err(RecvError::Lagged(missed)) => {
                    let deleted = stream.take_missed_deletions();
                    let cached = self.lister.keys();
                    warn!(
                        controller = %self.controller,
                        missed,
                        cached = cached.len(),
                        deleted = deleted.len(),
                        "Notification stream lagged, enqueueing every cached and deleted key"
                    );
                    cached
                        .into_iter()
                        .chain(deleted)
                        .for_each(|key| self.queue.add(key));
                }
                Err(RecvError::Closed) => {
                    debug!(controller = %self.controller, "Notification stream closed");
                    break;
                }
            }
        }
        debug!(controller = %self.controller, "Notification pump stopped");
    }
}
