//! Worker loop: take a key, reconcile it, release it.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use steward_core::ObjectKey;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::queue::WorkQueue;
use crate::reconciler::Reconcile;
use crate::types::{Outcome, ReconcileError};

/// Releases the key on every exit path, including cancellation.
struct DoneGuard<'a> {
    queue: &'a WorkQueue<ObjectKey>,
    key: &'a ObjectKey,
}

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        self.queue.done(self.key);
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

pub(crate) struct Worker {
    pub(crate) id: usize,
    pub(crate) controller: Arc<str>,
    pub(crate) queue: WorkQueue<ObjectKey>,
    pub(crate) reconciler: Arc<dyn Reconcile>,
    pub(crate) max_retries: u32,
}

impl Worker {
    /// Process keys until the queue is shut down and empty.
    pub(crate) async fn run(self) {
        debug!(controller = %self.controller, worker = self.id, "Worker started");
        while let Some(key) = self.queue.get().await {
            self.process(&key).await;
        }
        debug!(controller = %self.controller, worker = self.id, "Worker exiting");
    }

    async fn process(&self, key: &ObjectKey) {
        let _done = DoneGuard {
            queue: &self.queue,
            key,
        };
        let started = Instant::now();

        let outcome = AssertUnwindSafe(self.reconciler.reconcile(key))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Outcome::Retriable(ReconcileError::panicked(panic_message(payload.as_ref())))
            });

        self.handle(key, outcome, millis(started.elapsed()));
    }

    fn handle(&self, key: &ObjectKey, outcome: Outcome, elapsed_ms: u64) {
        let controller = &*self.controller;
        match outcome {
            Outcome::Success => {
                self.queue.forget(key);
                info!(controller, key = %key, worker = self.id, elapsed_ms, "Successfully synced");
            }
            Outcome::RequeueAfter(delay) => {
                self.queue.forget(key);
                self.queue.add_after(key.clone(), delay);
                info!(
                    controller,
                    key = %key,
                    worker = self.id,
                    delay_ms = millis(delay),
                    "Synced, reconcile scheduled"
                );
            }
            Outcome::Retriable(err) => {
                let requeues = self.queue.num_requeues(key);
                if requeues >= self.max_retries {
                    self.queue.forget(key);
                    error!(
                        controller,
                        key = %key,
                        requeues,
                        error = %err,
                        "Dropping key out of the queue, retries exhausted"
                    );
                    return;
                }
                match self.queue.add_rate_limited(key.clone()) {
                    Some(delay) => warn!(
                        controller,
                        key = %key,
                        requeues = requeues.saturating_add(1),
                        delay_ms = millis(delay),
                        error = %err,
                        "Reconcile failed, requeuing"
                    ),
                    None => warn!(
                        controller,
                        key = %key,
                        error = %err,
                        "Reconcile failed during shutdown, not requeuing"
                    ),
                }
            }
            Outcome::Terminal(err) if err.is_not_found() => {
                self.queue.forget(key);
                info!(controller, key = %key, "Resource no longer exists, nothing to do");
            }
            Outcome::Terminal(err) => {
                self.queue.forget(key);
                error!(controller, key = %key, error = %err, "Reconcile failed permanently");
            }
        }
    }
}
