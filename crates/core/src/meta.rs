//! Object metadata and the [`Resource`] trait.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::key::ObjectKey;

/// Metadata common to every watched object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Namespace; `None` or empty for cluster-scoped objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Object name, unique within its namespace.
    pub name: String,
    /// Opaque version of the stored object.
    #[serde(default)]
    pub resource_version: u64,
    /// Spec generation.
    #[serde(default)]
    pub generation: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Create metadata for a namespace and name. An empty namespace means
    /// cluster-scoped.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            namespace: (!namespace.is_empty()).then_some(namespace),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the resource version.
    #[must_use]
    pub const fn with_resource_version(mut self, version: u64) -> Self {
        self.resource_version = version;
        self
    }

    /// Add a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Anything the controller can watch.
///
/// The engine never looks past the metadata: the key is all it needs.
pub trait Resource {
    /// Object metadata.
    fn meta(&self) -> &ObjectMeta;

    /// Derive the object's key.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedKey`] if the metadata cannot form a key.
    fn key(&self) -> Result<ObjectKey> {
        ObjectKey::for_object(self)
    }
}

impl Resource for ObjectMeta {
    fn meta(&self) -> &ObjectMeta {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_empty_namespace() {
        let meta = ObjectMeta::new("", "cluster-thing");
        assert!(meta.namespace.is_none());
    }

    #[test]
    fn test_key_from_meta() {
        let meta = ObjectMeta::new("default", "foo").with_resource_version(3);
        assert_eq!(meta.key().ok().map(|k| k.to_string()), Some("default/foo".to_string()));
        assert_eq!(meta.resource_version, 3);
    }

    #[test]
    fn test_with_label_overrides_existing_value() {
        let meta = ObjectMeta::new("default", "web")
            .with_label("app", "web")
            .with_label("tier", "frontend")
            .with_label("app", "web-v2");
        assert_eq!(meta.labels.len(), 2);
        assert_eq!(meta.labels.get("app").map(String::as_str), Some("web-v2"));
    }

    #[test]
    fn test_meta_deserializes_with_defaults() {
        let meta: std::result::Result<ObjectMeta, _> =
            toml::from_str("name = \"foo\"\nnamespace = \"prod\"");
        let meta = meta.ok();
        assert_eq!(meta.as_ref().map(|m| m.generation), Some(0));
        assert_eq!(meta.and_then(|m| m.namespace), Some("prod".to_string()));
    }
}
