//! Deduplicating, rate-limited work queue.
//!
//! Every key tracked by the queue is in one of three states:
//!
//! - **pending**: queued and waiting for a worker
//! - **processing**: handed out by [`WorkQueue::get`] and not yet released
//!   with [`WorkQueue::done`]
//! - **dirty**: added again while processing; it is queued once more as soon
//!   as the current holder calls `done`
//!
//! A key is queued at most once and handed to at most one worker at a time.
//! Repeated adds collapse into a single delivery, and an add that arrives
//! while the key is processing is deferred, never dropped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use steward_core::ControllerConfig;
use tokio::runtime::Handle;
use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::rate_limiter::{RateLimiter, default_controller_rate_limiter};

/// Point-in-time view of the queue's bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Keys waiting for a worker.
    pub pending: usize,
    /// Keys currently held by workers.
    pub processing: usize,
    /// Processing keys that were added again and will be redelivered.
    pub dirty: usize,
    /// Keys scheduled by `add_after` and not yet added.
    pub waiting: usize,
    /// Adds that were not collapsed into an existing entry.
    pub adds: u64,
    /// Calls to `add_rate_limited` accepted before shutdown.
    pub retries: u64,
}

#[derive(Debug)]
struct State<K> {
    /// Delivery order of pending keys.
    queue: VecDeque<K>,
    /// Keys that need processing: every pending key, plus dirty ones.
    needs_processing: HashSet<K>,
    processing: HashSet<K>,
    /// Ready time of each delayed add.
    waiting: HashMap<K, Instant>,
    shutting_down: bool,
    adds: u64,
    retries: u64,
}

impl<K> Default for State<K> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            needs_processing: HashSet::new(),
            processing: HashSet::new(),
            waiting: HashMap::new(),
            shutting_down: false,
            adds: 0,
            retries: 0,
        }
    }
}

enum Take<K> {
    Item(K),
    Shutdown,
    Empty,
}

impl<K: Clone + Eq + Hash> State<K> {
    /// Returns true if the key became pending.
    fn add(&mut self, key: K) -> bool {
        if self.shutting_down || self.needs_processing.contains(&key) {
            return false;
        }
        self.adds = self.adds.saturating_add(1);
        self.needs_processing.insert(key.clone());
        if self.processing.contains(&key) {
            return false;
        }
        self.queue.push_back(key);
        true
    }

    fn take(&mut self) -> Take<K> {
        match self.queue.pop_front() {
            Some(key) => {
                self.needs_processing.remove(&key);
                self.processing.insert(key.clone());
                Take::Item(key)
            }
            None if self.shutting_down => Take::Shutdown,
            None => Take::Empty,
        }
    }

    /// Returns true if the key was dirty and became pending again.
    fn done(&mut self, key: &K) -> bool {
        if !self.processing.remove(key) {
            return false;
        }
        if self.needs_processing.contains(key) {
            self.queue.push_back(key.clone());
            return true;
        }
        false
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.queue.len(),
            processing: self.processing.len(),
            dirty: self
                .processing
                .iter()
                .filter(|k| self.needs_processing.contains(*k))
                .count(),
            waiting: self.waiting.len(),
            adds: self.adds,
            retries: self.retries,
        }
    }
}

struct Inner<K> {
    name: String,
    state: Mutex<State<K>>,
    /// Wakes `get` callers when a key becomes pending or on shutdown.
    available: Notify,
    /// Wakes `shut_down_with_drain` when nothing is processing.
    idle: Notify,
    /// Cancels delayed adds on shutdown.
    shutdown: watch::Sender<bool>,
    rate_limiter: Box<dyn RateLimiter<K>>,
}

/// Cheaply cloneable handle to a shared work queue.
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> fmt::Debug for WorkQueue<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    /// Create a queue with a custom rate limiter.
    pub fn new(name: impl Into<String>, rate_limiter: impl RateLimiter<K> + 'static) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(State::default()),
                available: Notify::new(),
                idle: Notify::new(),
                shutdown,
                rate_limiter: Box::new(rate_limiter),
            }),
        }
    }

    /// Create a queue using [`default_controller_rate_limiter`].
    pub fn with_config(config: &ControllerConfig) -> Self {
        Self::new(config.name.clone(), default_controller_rate_limiter(config))
    }

    /// Queue name, used in logs.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    // Every critical section leaves the state consistent, so a poisoned lock
    // is still usable.
    fn lock(&self) -> MutexGuard<'_, State<K>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `key` as needing processing.
    ///
    /// Collapses into an existing pending entry. If the key is processing it
    /// is marked dirty and redelivered after `done`. Ignored after shutdown.
    pub fn add(&self, key: K) {
        let queued = self.lock().add(key.clone());
        if queued {
            debug!(queue = %self.inner.name, key = ?key, "Key queued");
            self.inner.available.notify_one();
        }
    }

    /// Wait for a pending key and mark it processing.
    ///
    /// Returns `None` once the queue is shut down and no pending keys remain.
    /// Keys pending at shutdown are still handed out.
    pub async fn get(&self) -> Option<K> {
        loop {
            let available = self.inner.available.notified();
            tokio::pin!(available);
            // Register before checking so a concurrent add cannot be missed.
            available.as_mut().enable();

            match self.take() {
                Take::Item(key) => return Some(key),
                Take::Shutdown => return None,
                Take::Empty => available.await,
            }
        }
    }

    fn take(&self) -> Take<K> {
        self.lock().take()
    }

    /// Release a key handed out by [`Self::get`].
    ///
    /// A key marked dirty while processing becomes pending again. Calling
    /// `done` for a key that is not processing does nothing.
    pub fn done(&self, key: &K) {
        let (requeued, idle) = {
            let mut state = self.lock();
            let requeued = state.done(key);
            (requeued, state.processing.is_empty())
        };
        if requeued {
            debug!(queue = %self.inner.name, key = ?key, "Dirty key requeued");
            self.inner.available.notify_one();
        }
        if idle {
            self.inner.idle.notify_waiters();
        }
    }

    /// Add `key` after `delay` without blocking the caller.
    ///
    /// A key already waiting with an earlier or equal ready time keeps its
    /// schedule. Delayed adds are dropped on shutdown.
    pub fn add_after(&self, key: K, delay: Duration) {
        self.schedule(key, delay);
    }

    /// Returns false when nothing was scheduled because the queue is shutting
    /// down or the delay is out of range.
    fn schedule(&self, key: K, delay: Duration) -> bool {
        if delay.is_zero() {
            let (accepted, queued) = {
                let mut state = self.lock();
                (!state.shutting_down, state.add(key.clone()))
            };
            if queued {
                debug!(queue = %self.inner.name, key = ?key, "Key queued");
                self.inner.available.notify_one();
            }
            return accepted;
        }
        let Some(ready_at) = Instant::now().checked_add(delay) else {
            warn!(queue = %self.inner.name, key = ?key, "Requeue delay out of range, dropping");
            return false;
        };

        {
            let mut state = self.lock();
            if state.shutting_down {
                return false;
            }
            if state.waiting.get(&key).is_some_and(|at| *at <= ready_at) {
                return true;
            }
            state.waiting.insert(key.clone(), ready_at);
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!(queue = %self.inner.name, key = ?key, "No runtime for delayed add, adding now");
            self.fire(key, ready_at);
            return true;
        };

        let queue = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        runtime.spawn(async move {
            tokio::select! {
                () = tokio::time::sleep_until(ready_at) => queue.fire(key, ready_at),
                () = wait_true(&mut shutdown) => {}
            }
        });
        true
    }

    fn fire(&self, key: K, ready_at: Instant) {
        let current = {
            let mut state = self.lock();
            let current = state.waiting.get(&key) == Some(&ready_at);
            if current {
                state.waiting.remove(&key);
            }
            current
        };
        // A superseded timer stays silent; the earlier one already added.
        if current {
            self.add(key);
        }
    }

    /// Schedule `key` again after the rate limiter's delay and record one more
    /// failure. Returns the chosen delay, or `None` after shutdown.
    pub fn add_rate_limited(&self, key: K) -> Option<Duration> {
        if self.is_shutting_down() {
            return None;
        }
        let delay = self.inner.rate_limiter.when(&key);
        // Shutdown may land between the check above and the schedule.
        if !self.schedule(key, delay) {
            return None;
        }
        let mut state = self.lock();
        state.retries = state.retries.saturating_add(1);
        Some(delay)
    }

    /// Clear retry state for `key`.
    pub fn forget(&self, key: &K) {
        self.inner.rate_limiter.forget(key);
    }

    /// Consecutive failures recorded for `key`.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.inner.rate_limiter.num_requeues(key)
    }

    /// Stop accepting adds and wake every blocked `get`.
    ///
    /// Pending keys are still handed out; `get` returns `None` once they are
    /// exhausted.
    pub fn shut_down(&self) {
        {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
            state.waiting.clear();
        }
        info!(queue = %self.inner.name, "Shutting down work queue");
        self.inner.shutdown.send_replace(true);
        self.inner.available.notify_waiters();
        self.inner.idle.notify_waiters();
    }

    /// [`Self::shut_down`], then wait until no key is processing.
    pub async fn shut_down_with_drain(&self) {
        self.shut_down();
        loop {
            let idle = self.inner.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            if self.is_idle() {
                return;
            }
            idle.await;
        }
    }

    fn is_idle(&self) -> bool {
        self.lock().processing.is_empty()
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of pending keys.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Whether no key is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Snapshot of the queue's bookkeeping.
    pub fn stats(&self) -> QueueStats {
        self.lock().stats()
    }
}

/// Resolve once the watched flag is true or its sender is gone.
pub(crate) async fn wait_true(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::ItemExponentialFailureRateLimiter;
    use std::sync::OnceLock;

    fn queue() -> WorkQueue<&'static str> {
        WorkQueue::new(
            "test",
            ItemExponentialFailureRateLimiter::new(Duration::from_millis(5), Duration::from_secs(1)),
        )
    }

    #[tokio::test]
    async fn test_duplicate_adds_collapse() {
        let q = queue();
        q.add("ns/foo");
        q.add("ns/foo");
        q.add("ns/foo");
        assert_eq!(q.len(), 1);
        assert_eq!(q.stats().adds, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_config_uses_configured_backoff() {
        let config = ControllerConfig::default()
            .with_backoff(Duration::from_millis(7), Duration::from_secs(1));
        let q = WorkQueue::<&'static str>::with_config(&config);
        assert_eq!(q.name(), config.name);
        assert_eq!(q.add_rate_limited("ns/foo"), Some(Duration::from_millis(7)));
    }

    #[tokio::test]
    async fn test_fifo_between_distinct_keys() {
        let q = queue();
        q.add("ns/a");
        q.add("ns/b");
        assert_eq!(q.get().await, Some("ns/a"));
        assert_eq!(q.get().await, Some("ns/b"));
    }

    #[tokio::test]
    async fn test_add_while_processing_marks_dirty() {
        let q = queue();
        q.add("ns/foo");
        let key = q.get().await;
        assert_eq!(key, Some("ns/foo"));

        q.add("ns/foo");
        q.add("ns/foo");
        let stats = q.stats();
        assert_eq!(stats.pending, 0, "dirty key must not be pending while processing");
        assert_eq!(stats.dirty, 1);

        q.done(&"ns/foo");
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await, Some("ns/foo"));
        q.done(&"ns/foo");
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_done_without_get_does_not_duplicate() {
        let q = queue();
        q.add("ns/foo");
        q.done(&"ns/foo");
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn test_add_after_shutdown_ignored() {
        let q = queue();
        q.shut_down();
        q.add("ns/foo");
        assert!(q.is_empty());
        assert_eq!(q.get().await, None);
        assert_eq!(q.add_rate_limited("ns/foo"), None);
    }

    #[tokio::test]
    async fn test_pending_keys_survive_shutdown() {
        let q = queue();
        q.add("ns/a");
        q.add("ns/b");
        q.shut_down();
        assert_eq!(q.get().await, Some("ns/a"));
        assert_eq!(q.get().await, Some("ns/b"));
        assert_eq!(q.get().await, None);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_blocked_getters() {
        let q = queue();
        let getters = (0..3)
            .map(|_| {
                let q = q.clone();
                tokio::spawn(async move { q.get().await })
            })
            .collect::<Vec<_>>();
        tokio::task::yield_now().await;

        q.shut_down();
        for getter in getters {
            let result = tokio::time::timeout(Duration::from_secs(1), getter).await;
            assert!(matches!(result, Ok(Ok(None))));
        }
    }

    #[tokio::test]
    async fn test_blocked_get_wakes_on_add() {
        let q = queue();
        let getter = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;
        q.add("ns/late");
        let result = tokio::time::timeout(Duration::from_secs(1), getter).await;
        assert!(matches!(result, Ok(Ok(Some("ns/late")))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_delays_delivery() {
        let q = queue();
        q.add_after("ns/foo", Duration::from_secs(10));
        assert!(q.is_empty());
        assert_eq!(q.stats().waiting, 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(q.is_empty());

        let start = Instant::now();
        assert_eq!(q.get().await, Some("ns/foo"));
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert_eq!(q.stats().waiting, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_keeps_earliest_schedule() {
        let q = queue();
        q.add_after("ns/foo", Duration::from_secs(1));
        q.add_after("ns/foo", Duration::from_secs(60));
        q.add_after("ns/foo", Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(q.get().await, Some("ns/foo"));
        q.done(&"ns/foo");

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(q.is_empty(), "superseded timers must not add again");
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_add_after_reschedules() {
        let q = queue();
        q.add_after("ns/foo", Duration::from_secs(60));
        q.add_after("ns/foo", Duration::from_secs(1));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await, Some("ns/foo"));
        q.done(&"ns/foo");

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_delayed_adds() {
        let q = queue();
        q.add_after("ns/foo", Duration::from_secs(1));
        q.shut_down();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(q.stats().waiting, 0);
        assert_eq!(q.get().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_backoff_and_forget() {
        let q = queue();
        assert_eq!(q.add_rate_limited("ns/bar"), Some(Duration::from_millis(5)));
        assert_eq!(q.add_rate_limited("ns/bar"), Some(Duration::from_millis(10)));
        assert_eq!(q.num_requeues(&"ns/bar"), 2);
        assert_eq!(q.stats().retries, 2);

        q.forget(&"ns/bar");
        assert_eq!(q.num_requeues(&"ns/bar"), 0);
    }

    /// Shuts its queue down from inside `when`, as a concurrent shutdown would.
    struct ShutsDownOnWhen {
        queue: Arc<OnceLock<WorkQueue<&'static str>>>,
        inner: ItemExponentialFailureRateLimiter<&'static str>,
    }

    impl RateLimiter<&'static str> for ShutsDownOnWhen {
        fn when(&self, key: &&'static str) -> Duration {
            if let Some(q) = self.queue.get() {
                q.shut_down();
            }
            self.inner.when(key)
        }

        fn forget(&self, key: &&'static str) {
            self.inner.forget(key);
        }

        fn num_requeues(&self, key: &&'static str) -> u32 {
            self.inner.num_requeues(key)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_add_racing_shutdown_reports_not_requeued() {
        let slot = Arc::new(OnceLock::new());
        let q = WorkQueue::new(
            "race",
            ShutsDownOnWhen {
                queue: Arc::clone(&slot),
                inner: ItemExponentialFailureRateLimiter::new(
                    Duration::from_millis(5),
                    Duration::from_secs(1),
                ),
            },
        );
        assert!(slot.set(q.clone()).is_ok());

        assert_eq!(q.add_rate_limited("ns/late"), None);
        assert!(q.is_shutting_down());
        let stats = q.stats();
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.retries, 0);
        assert_eq!(q.get().await, None);
    }

    #[tokio::test]
    async fn test_shut_down_with_drain_waits_for_processing() {
        let q = queue();
        q.add("ns/foo");
        let held = q.get().await;
        assert_eq!(held, Some("ns/foo"));

        let drain = {
            let q = q.clone();
            tokio::spawn(async move { q.shut_down_with_drain().await })
        };
        tokio::task::yield_now().await;
        assert!(!drain.is_finished());

        q.done(&"ns/foo");
        let result = tokio::time::timeout(Duration::from_secs(1), drain).await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
