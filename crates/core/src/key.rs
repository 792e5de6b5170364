//! Resource keys: `namespace/name`, or `name` for cluster-scoped resources.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::meta::Resource;

/// Separator between namespace and name in the string form of a key.
pub const KEY_SEPARATOR: char = '/';

/// Identity of one logical resource.
///
/// The string form round-trips: `ObjectKey::parse(&key.to_string()) == Ok(key)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    namespace: Option<String>,
    name: String,
}

impl ObjectKey {
    /// Key for a namespaced resource.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedKey`] if either part is empty or contains `/`.
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        let name = name.into();
        let raw = format!("{namespace}{KEY_SEPARATOR}{name}");
        validate_segment(&raw, "namespace", &namespace)?;
        validate_segment(&raw, "name", &name)?;
        Ok(Self {
            namespace: Some(namespace),
            name,
        })
    }

    /// Key for a cluster-scoped resource.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedKey`] if the name is empty or contains `/`.
    pub fn cluster(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_segment(&name, "name", &name)?;
        Ok(Self {
            namespace: None,
            name,
        })
    }

    /// Split a `namespace/name` (or `name`) string into a key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedKey`] when the string has more than two
    /// segments or an empty segment.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.split(KEY_SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) => {
                validate_segment(raw, "name", name)?;
                Ok(Self {
                    namespace: None,
                    name: name.to_string(),
                })
            }
            (Some(namespace), Some(name), None) => {
                validate_segment(raw, "namespace", namespace)?;
                validate_segment(raw, "name", name)?;
                Ok(Self {
                    namespace: Some(namespace.to_string()),
                    name: name.to_string(),
                })
            }
            _ => Err(Error::malformed_key(
                raw,
                "expected 'namespace/name' or 'name'",
            )),
        }
    }

    /// Derive the key of an object from its metadata.
    ///
    /// An empty namespace is treated as cluster-scoped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedKey`] if the metadata name is empty or
    /// either part contains `/`.
    pub fn for_object<R: Resource + ?Sized>(object: &R) -> Result<Self> {
        let meta = object.meta();
        match meta.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => Self::namespaced(ns, meta.name.as_str()),
            _ => Self::cluster(meta.name.as_str()),
        }
    }

    /// Namespace, if the resource is namespaced.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

fn validate_segment(raw: &str, what: &str, segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::malformed_key(raw, format!("empty {what}")));
    }
    if segment.contains(KEY_SEPARATOR) {
        return Err(Error::malformed_key(
            raw,
            format!("{what} contains '{KEY_SEPARATOR}'"),
        ));
    }
    Ok(())
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}{KEY_SEPARATOR}{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for ObjectKey {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::ObjectMeta;
    use proptest::prelude::*;

    #[test]
    fn test_parse_namespaced() {
        let key = ObjectKey::parse("default/example-submarine");
        assert!(key.is_ok());
        let key = key.ok();
        assert_eq!(key.as_ref().and_then(ObjectKey::namespace), Some("default"));
        assert_eq!(key.as_ref().map(ObjectKey::name), Some("example-submarine"));
    }

    #[test]
    fn test_parse_cluster_scoped() {
        let key = ObjectKey::parse("node-1").ok();
        assert_eq!(key.as_ref().and_then(ObjectKey::namespace), None);
        assert_eq!(key.map(|k| k.to_string()), Some("node-1".to_string()));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for raw in ["", "a/b/c", "ns/", "/name", "/"] {
            let result = ObjectKey::parse(raw);
            assert!(
                matches!(result, Err(Error::MalformedKey { .. })),
                "expected '{raw}' to be rejected"
            );
        }
    }

    #[test]
    fn test_for_object_empty_namespace_is_cluster_scoped() {
        let meta = ObjectMeta::new("", "thing");
        let key = ObjectKey::for_object(&meta).ok();
        assert_eq!(key.map(|k| k.to_string()), Some("thing".to_string()));
    }

    #[test]
    fn test_for_object_requires_name() {
        let meta = ObjectMeta::new("ns", "");
        assert!(ObjectKey::for_object(&meta).is_err());
    }

    proptest! {
        /// Property: display and parse agree for every well-formed key
        #[test]
        fn prop_display_parse_agree(
            namespace in proptest::option::of("[a-z0-9-]{1,20}"),
            name in "[a-z0-9.-]{1,40}",
        ) {
            let key = match &namespace {
                Some(ns) => ObjectKey::namespaced(ns.as_str(), name.as_str()),
                None => ObjectKey::cluster(name.as_str()),
            };
            prop_assert!(key.is_ok());
            let key = key.ok();
            let reparsed = key.as_ref().and_then(|k| ObjectKey::parse(&k.to_string()).ok());
            prop_assert_eq!(key, reparsed);
        }
    }
}
