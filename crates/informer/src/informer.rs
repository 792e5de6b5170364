//! Informer: a cache plus a change-notification feed.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use steward_core::{ObjectKey, Resource, Result};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::notification::{DeletedObject, Notification};
use crate::store::{Lister, Store};

/// Default notification buffer per subscriber.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Signal that the cache has completed its initial listing.
#[async_trait]
pub trait CacheSync: Send + Sync {
    /// Whether the initial listing has completed.
    fn has_synced(&self) -> bool;

    /// Wait until synced, at most `timeout`. Returns `false` on timeout.
    async fn wait_for_sync(&self, timeout: Duration) -> bool;
}

/// Error receiving from a [`NotificationStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    /// The subscriber fell behind and this many notifications were lost.
    Lagged(u64),
    /// The informer was dropped.
    Closed,
}

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lagged(n) => write!(f, "subscriber lagged, {n} notifications lost"),
            Self::Closed => write!(f, "notification channel closed"),
        }
    }
}

impl std::error::Error for RecvError {}

/// Deletions published to one subscriber and not yet received, keyed to the
/// sequence number of the latest such deletion.
type PendingDeletes = Mutex<HashMap<ObjectKey, u64>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Envelope<T> {
    seq: u64,
    notification: Notification<T>,
}

impl<T> Clone for Envelope<T> {
    fn clone(&self) -> Self {
        Self {
            seq: self.seq,
            notification: self.notification.clone(),
        }
    }
}

/// Subscription handle for receiving notifications.
pub struct NotificationStream<T> {
    receiver: broadcast::Receiver<Envelope<T>>,
    pending_deletes: Arc<PendingDeletes>,
}

impl<T: Resource> NotificationStream<T> {
    /// Receive the next notification.
    ///
    /// # Errors
    ///
    /// Returns [`RecvError::Lagged`] when notifications were dropped for this
    /// subscriber and [`RecvError::Closed`] once the informer is gone.
    pub async fn recv(&mut self) -> std::result::Result<Notification<T>, RecvError> {
        let Envelope { seq, notification } = self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Lagged(n) => RecvError::Lagged(n),
            broadcast::error::RecvError::Closed => RecvError::Closed,
        })?;
        if let (Notification::Deleted(_), Ok(key)) = (&notification, notification.key()) {
            let mut pending = lock(&self.pending_deletes);
            // A later deletion of the same key is still outstanding.
            if pending.get(&key) == Some(&seq) {
                pending.remove(&key);
            }
        }
        Ok(notification)
    }

    /// Take the keys of deletions published to this subscriber that it has
    /// not received yet.
    ///
    /// After [`RecvError::Lagged`] these include deletions that were lost, which
    /// the cache can no longer report. Deletions still buffered are returned
    /// too and are delivered by `recv` as usual.
    pub fn take_missed_deletions(&mut self) -> Vec<ObjectKey> {
        lock(&self.pending_deletes).drain().map(|(key, _)| key).collect()
    }
}

/// In-process informer.
///
/// Writers (a watch client, a test, the demo binary) push object changes in;
/// the informer updates its [`Store`] and publishes one [`Notification`] per
/// change to every subscriber.
pub struct Informer<T> {
    store: Arc<Store<T>>,
    sender: broadcast::Sender<Envelope<T>>,
    synced: watch::Sender<bool>,
    subscribers: Mutex<Subscribers>,
}

#[derive(Default)]
struct Subscribers {
    next_seq: u64,
    pending_deletes: Vec<Weak<PendingDeletes>>,
}

impl<T> Informer<T>
where
    T: Resource + Send + Sync + 'static,
{
    /// Create an informer with the default notification buffer.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create an informer buffering `capacity` notifications per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        let (synced, _) = watch::channel(false);
        Self {
            store: Arc::new(Store::new()),
            sender,
            synced,
            subscribers: Mutex::new(Subscribers::default()),
        }
    }

    /// Read-only view of the cache.
    pub fn lister(&self) -> Lister<T> {
        Lister::new(Arc::clone(&self.store))
    }

    /// Subscribe to all subsequent notifications.
    pub fn subscribe(&self) -> NotificationStream<T> {
        let pending_deletes = Arc::new(PendingDeletes::default());
        let mut subscribers = lock(&self.subscribers);
        subscribers.pending_deletes.push(Arc::downgrade(&pending_deletes));
        NotificationStream {
            receiver: self.sender.subscribe(),
            pending_deletes,
        }
    }

    fn publish(&self, notification: Notification<T>) {
        debug!(
            kind = %notification.kind(),
            subscribers = self.sender.receiver_count(),
            "Publishing notification"
        );
        let deleted = match &notification {
            Notification::Deleted(_) => notification.key().ok(),
            _ => None,
        };

        // Held across the send so a concurrent subscribe sees both or neither.
        let mut subscribers = lock(&self.subscribers);
        let seq = subscribers.next_seq;
        subscribers.next_seq = seq.wrapping_add(1);
        if let Some(key) = deleted {
            subscribers.pending_deletes.retain(|weak| match weak.upgrade() {
                Some(pending) => {
                    lock(&pending).insert(key.clone(), seq);
                    true
                }
                None => false,
            });
        }
        // No subscribers is not an error.
        let _ = self.sender.send(Envelope { seq, notification });
    }

    /// Record a new object. Behaves as [`Self::update`] if the key is cached.
    ///
    /// # Errors
    ///
    /// Returns [`steward_core::Error::MalformedKey`] if the object has no valid
    /// key; the cache is left untouched.
    pub fn add(&self, object: T) -> Result<ObjectKey> {
        self.upsert(object)
    }

    /// Record a changed object. Behaves as [`Self::add`] if the key is new.
    ///
    /// # Errors
    ///
    /// Returns [`steward_core::Error::MalformedKey`] if the object has no valid
    /// key; the cache is left untouched.
    pub fn update(&self, object: T) -> Result<ObjectKey> {
        self.upsert(object)
    }

    fn upsert(&self, object: T) -> Result<ObjectKey> {
        let key = object.key()?;
        let new = Arc::new(object);
        let notification = match self.store.insert(key.clone(), Arc::clone(&new)) {
            Some(old) => Notification::Updated { old, new },
            None => Notification::Added(new),
        };
        self.publish(notification);
        Ok(key)
    }

    /// Remove an object. Returns the last cached copy, if any; nothing is
    /// published for an unknown key.
    pub fn delete(&self, key: &ObjectKey) -> Option<Arc<T>> {
        let removed = self.store.remove(key);
        if let Some(obj) = &removed {
            self.publish(Notification::Deleted(DeletedObject::Observed(Arc::clone(obj))));
        }
        removed
    }

    /// Replace the whole cache with a fresh listing and mark it synced.
    ///
    /// Objects absent from the listing are reported as deletions whose final
    /// state is unknown. Objects without a valid key are skipped.
    pub fn replace(&self, objects: Vec<T>) {
        let mut listed = HashMap::with_capacity(objects.len());
        for object in objects {
            match object.key() {
                Ok(key) => {
                    listed.insert(key, Arc::new(object));
                }
                Err(e) => warn!(error = %e, "Skipping listed object without a valid key"),
            }
        }

        let fresh = listed
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect::<Vec<_>>();
        let mut previous = self.store.replace(listed);
        let count = fresh.len();

        for (key, new) in fresh {
            let notification = match previous.remove(&key) {
                Some(old) => Notification::Updated { old, new },
                None => Notification::Added(new),
            };
            self.publish(notification);
        }
        for (key, last) in previous {
            self.publish(Notification::Deleted(DeletedObject::FinalStateUnknown {
                key: key.to_string(),
                last_known: Some(last),
            }));
        }

        if !self.synced.send_replace(true) {
            info!(objects = count, "Informer cache synced");
        }
    }

    /// Re-publish every cached object as an update with `old == new`.
    pub fn resync(&self) {
        let entries = self.store.entries();
        debug!(objects = entries.len(), "Resyncing informer cache");
        for (_, obj) in entries {
            self.publish(Notification::Updated {
                old: Arc::clone(&obj),
                new: obj,
            });
        }
    }

    /// Whether the initial listing has completed.
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Run [`Self::resync`] every `period` until `stop` resolves.
    pub fn spawn_resync<F>(self: &Arc<Self>, period: Duration, stop: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let informer = Arc::clone(self);
        tokio::spawn(async move {
            tokio::pin!(stop);
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => informer.resync(),
                    () = &mut stop => {
                        debug!("Resync loop stopped");
                        return;
                    }
                }
            }
        })
    }
}

impl<T> Default for Informer<T>
where
    T: Resource + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> CacheSync for Informer<T>
where
    T: Resource + Send + Sync + 'static,
{
    fn has_synced(&self) -> bool {
        Self::has_synced(self)
    }

    async fn wait_for_sync(&self, timeout: Duration) -> bool {
        let mut synced = self.synced.subscribe();
        let wait = async move {
            while !*synced.borrow_and_update() {
                if synced.changed().await.is_err() {
                    return false;
                }
            }
            true
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::NotificationKind;
    use steward_core::ObjectMeta;

    fn key(raw: &str) -> Option<ObjectKey> {
        ObjectKey::parse(raw).ok()
    }

    #[tokio::test]
    async fn test_add_then_update_notifications() {
        let informer = Informer::<ObjectMeta>::new();
        let mut sub = informer.subscribe();

        assert!(informer.add(ObjectMeta::new("ns", "foo")).is_ok());
        assert!(
            informer
                .update(ObjectMeta::new("ns", "foo").with_resource_version(2))
                .is_ok()
        );

        let first = sub.recv().await.ok();
        let second = sub.recv().await.ok();
        assert_eq!(first.map(|n| n.kind()), Some(NotificationKind::Add));
        assert_eq!(second.map(|n| n.kind()), Some(NotificationKind::Update));
    }

    #[tokio::test]
    async fn test_delete_unknown_key_publishes_nothing() {
        let informer = Informer::<ObjectMeta>::new();
        let mut sub = informer.subscribe();

        let missing = key("ns/missing");
        assert!(missing.as_ref().and_then(|k| informer.delete(k)).is_none());

        assert!(informer.add(ObjectMeta::new("ns", "a")).is_ok());
        let next = sub.recv().await.ok();
        assert_eq!(next.map(|n| n.kind()), Some(NotificationKind::Add));
    }

    #[tokio::test]
    async fn test_replace_marks_synced_and_reports_vanished() {
        let informer = Informer::<ObjectMeta>::new();
        assert!(informer.add(ObjectMeta::new("ns", "stale")).is_ok());
        assert!(!informer.has_synced());

        let mut sub = informer.subscribe();
        informer.replace(vec![ObjectMeta::new("ns", "fresh")]);
        assert!(informer.has_synced());

        let added = sub.recv().await.ok();
        assert_eq!(added.as_ref().map(Notification::kind), Some(NotificationKind::Add));

        let deleted = sub.recv().await.ok();
        assert!(matches!(
            deleted,
            Some(Notification::Deleted(DeletedObject::FinalStateUnknown { ref key, .. }))
                if key == "ns/stale"
        ));
        assert_eq!(informer.lister().keys(), key("ns/fresh").into_iter().collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_malformed_object_rejected() {
        let informer = Informer::<ObjectMeta>::new();
        assert!(informer.add(ObjectMeta::new("ns", "")).is_err());
        assert!(informer.lister().list().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_sync_times_out() {
        let informer = Informer::<ObjectMeta>::new();
        assert!(!informer.wait_for_sync(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_wait_for_sync_observes_replace() {
        let informer = Arc::new(Informer::<ObjectMeta>::new());
        let waiter = {
            let informer = Arc::clone(&informer);
            tokio::spawn(async move { informer.wait_for_sync(Duration::from_secs(5)).await })
        };
        informer.replace(Vec::new());
        assert_eq!(waiter.await.ok(), Some(true));
    }

    #[tokio::test]
    async fn test_lagged_subscriber_recovers_lost_deletions() {
        let informer = Informer::<ObjectMeta>::with_capacity(1);
        let mut sub = informer.subscribe();

        assert!(informer.add(ObjectMeta::new("ns", "doomed")).is_ok());
        let doomed = key("ns/doomed");
        assert!(doomed.as_ref().and_then(|k| informer.delete(k)).is_some());
        assert!(informer.add(ObjectMeta::new("ns", "b")).is_ok());

        assert!(matches!(sub.recv().await, Err(RecvError::Lagged(2))));
        assert!(informer.lister().get("ns", "doomed").is_none());
        assert_eq!(sub.take_missed_deletions(), doomed.into_iter().collect::<Vec<_>>());
        assert!(sub.take_missed_deletions().is_empty());

        let next = sub.recv().await.ok();
        assert_eq!(next.map(|n| n.kind()), Some(NotificationKind::Add));
    }

    #[tokio::test]
    async fn test_received_deletion_is_not_reported_missed() {
        let informer = Informer::<ObjectMeta>::new();
        let mut sub = informer.subscribe();
        let foo = key("ns/foo");

        assert!(informer.add(ObjectMeta::new("ns", "foo")).is_ok());
        assert!(foo.as_ref().and_then(|k| informer.delete(k)).is_some());
        assert!(informer.add(ObjectMeta::new("ns", "foo")).is_ok());
        assert!(foo.as_ref().and_then(|k| informer.delete(k)).is_some());

        // Receiving the first deletion leaves the second outstanding.
        for _ in 0..2 {
            assert!(sub.recv().await.is_ok());
        }
        assert_eq!(sub.take_missed_deletions(), foo.clone().into_iter().collect::<Vec<_>>());

        for _ in 0..2 {
            assert!(sub.recv().await.is_ok());
        }
        assert!(sub.take_missed_deletions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_resync() {
        let informer = Arc::new(Informer::<ObjectMeta>::new());
        informer.replace(vec![ObjectMeta::new("ns", "foo")]);
        let mut sub = informer.subscribe();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = informer.spawn_resync(Duration::from_secs(30), async move {
            let _ = stop_rx.await;
        });

        let resynced = sub.recv().await.ok();
        assert!(matches!(
            resynced,
            Some(Notification::Updated { ref old, ref new }) if Arc::ptr_eq(old, new)
        ));

        let _ = stop_tx.send(());
        assert!(handle.await.is_ok());
    }
}
