//! Change notifications emitted by the informer.

use std::fmt;
use std::sync::Arc;

use steward_core::{ObjectKey, Resource, Result};

/// Kind of change, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Add,
    Update,
    Delete,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// What is known about a deleted object.
#[derive(Debug)]
pub enum DeletedObject<T> {
    /// The deletion was observed with the object's final state.
    Observed(Arc<T>),
    /// The deletion was missed (for example across a relist); only the
    /// stored key is known, and possibly a stale copy of the object.
    FinalStateUnknown {
        key: String,
        last_known: Option<Arc<T>>,
    },
}

impl<T> Clone for DeletedObject<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Observed(obj) => Self::Observed(Arc::clone(obj)),
            Self::FinalStateUnknown { key, last_known } => Self::FinalStateUnknown {
                key: key.clone(),
                last_known: last_known.clone(),
            },
        }
    }
}

/// A single change to a watched resource.
#[derive(Debug)]
pub enum Notification<T> {
    /// Object appeared in the cache.
    Added(Arc<T>),
    /// Object changed. `old` and `new` are equal on a resync.
    Updated { old: Arc<T>, new: Arc<T> },
    /// Object left the cache.
    Deleted(DeletedObject<T>),
}

impl<T> Clone for Notification<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Added(obj) => Self::Added(Arc::clone(obj)),
            Self::Updated { old, new } => Self::Updated {
                old: Arc::clone(old),
                new: Arc::clone(new),
            },
            Self::Deleted(deleted) => Self::Deleted(deleted.clone()),
        }
    }
}

impl<T> Notification<T> {
    /// Kind of change.
    pub const fn kind(&self) -> NotificationKind {
        match self {
            Self::Added(_) => NotificationKind::Add,
            Self::Updated { .. } => NotificationKind::Update,
            Self::Deleted(_) => NotificationKind::Delete,
        }
    }

    /// The most recent copy of the object, if one is known.
    pub fn object(&self) -> Option<&Arc<T>> {
        match self {
            Self::Added(obj)
            | Self::Updated { new: obj, .. }
            | Self::Deleted(DeletedObject::Observed(obj)) => Some(obj),
            Self::Deleted(DeletedObject::FinalStateUnknown { last_known, .. }) => {
                last_known.as_ref()
            }
        }
    }
}

impl<T: Resource> Notification<T> {
    /// Derive the key of the resource this notification is about.
    ///
    /// Updates use the new object; tombstones use their stored key.
    ///
    /// # Errors
    ///
    /// Returns [`steward_core::Error::MalformedKey`] when no valid key can be
    /// derived.
    pub fn key(&self) -> Result<ObjectKey> {
        match self {
            Self::Added(obj)
            | Self::Updated { new: obj, .. }
            | Self::Deleted(DeletedObject::Observed(obj)) => ObjectKey::for_object(obj.as_ref()),
            Self::Deleted(DeletedObject::FinalStateUnknown { key, .. }) => ObjectKey::parse(key),
        }
    }
}
