//! In-memory object cache and its read-only lister.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use itertools::Itertools;
use steward_core::ObjectKey;

/// Thread-safe cache of the latest known copy of every object.
///
/// Reads and writes are synchronous and never held across an `.await`.
#[derive(Debug)]
pub struct Store<T> {
    objects: RwLock<HashMap<ObjectKey, Arc<T>>>,
}

impl<T> Default for Store<T> {
    fn default() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> Store<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking writer cannot leave the map half-updated, so a poisoned
    // lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<ObjectKey, Arc<T>>> {
        self.objects.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ObjectKey, Arc<T>>> {
        self.objects.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace an object, returning the previous copy.
    pub fn insert(&self, key: ObjectKey, object: Arc<T>) -> Option<Arc<T>> {
        self.write().insert(key, object)
    }

    /// Remove an object, returning the last copy.
    pub fn remove(&self, key: &ObjectKey) -> Option<Arc<T>> {
        self.write().remove(key)
    }

    /// Swap the whole content, returning the previous content.
    pub fn replace(&self, objects: HashMap<ObjectKey, Arc<T>>) -> HashMap<ObjectKey, Arc<T>> {
        std::mem::replace(&mut *self.write(), objects)
    }

    /// Look up an object by key.
    pub fn get(&self, key: &ObjectKey) -> Option<Arc<T>> {
        self.read().get(key).cloned()
    }

    /// Snapshot of every `(key, object)` pair.
    pub fn entries(&self) -> Vec<(ObjectKey, Arc<T>)> {
        self.read()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect_vec()
    }

    /// Sorted snapshot of every key.
    pub fn keys(&self) -> Vec<ObjectKey> {
        self.read().keys().cloned().sorted().collect_vec()
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// Read-only, cheaply cloneable view of a [`Store`].
#[derive(Debug)]
pub struct Lister<T> {
    store: Arc<Store<T>>,
}

impl<T> Clone for Lister<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<T> Lister<T> {
    /// Wrap a store.
    pub const fn new(store: Arc<Store<T>>) -> Self {
        Self { store }
    }

    /// Point lookup by namespace and name. An empty namespace looks up a
    /// cluster-scoped object.
    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<T>> {
        let key = if namespace.is_empty() {
            ObjectKey::cluster(name)
        } else {
            ObjectKey::namespaced(namespace, name)
        };
        key.ok().and_then(|k| self.store.get(&k))
    }

    /// Point lookup by key.
    pub fn get_by_key(&self, key: &ObjectKey) -> Option<Arc<T>> {
        self.store.get(key)
    }

    /// Every cached object in key order.
    pub fn list(&self) -> Vec<Arc<T>> {
        self.store
            .entries()
            .into_iter()
            .sorted_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, obj)| obj)
            .collect_vec()
    }

    /// Every cached object in one namespace, in key order.
    pub fn list_namespace(&self, namespace: &str) -> Vec<Arc<T>> {
        self.store
            .entries()
            .into_iter()
            .filter(|(k, _)| k.namespace() == Some(namespace))
            .sorted_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, obj)| obj)
            .collect_vec()
    }

    /// Every cached key in order.
    pub fn keys(&self) -> Vec<ObjectKey> {
        self.store.keys()
    }
}
