//! Reconciliation keys.
//!
//! A `ReconcileKey` names one Deployment and, by convention, the Service
//! derived from it. Keys are what flows through the work queue; objects
//! themselves are always re-read from the cache at reconcile time.

use crate::error::KeyError;
use kube::Resource;
use std::fmt;
use std::str::FromStr;

/// Namespace and name of a source object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReconcileKey {
    namespace: String,
    name: String,
}

impl ReconcileKey {
    /// Builds a key from its parts.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Extracts the key of a namespaced object.
    ///
    /// Objects without a name or namespace cannot be reconciled and are
    /// reported as a [`KeyError`] rather than skipped silently.
    pub fn from_object<K: Resource>(obj: &K) -> Result<Self, KeyError> {
        let meta = obj.meta();
        let name = meta
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or(KeyError::MissingName)?;
        let namespace = meta
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .ok_or_else(|| KeyError::MissingNamespace(name.to_string()))?;
        Ok(Self::new(namespace, name))
    }

    /// Namespace part.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name part.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ReconcileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ReconcileKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(KeyError::Malformed(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn deployment(namespace: Option<&str>, name: Option<&str>) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: name.map(str::to_string),
                namespace: namespace.map(str::to_string),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_from_object() {
        let key = ReconcileKey::from_object(&deployment(Some("default"), Some("web"))).unwrap();
        assert_eq!(key, ReconcileKey::new("default", "web"));
        assert_eq!(key.to_string(), "default/web");
    }

    #[test]
    fn test_from_object_missing_name() {
        let err = ReconcileKey::from_object(&deployment(Some("default"), None)).unwrap_err();
        assert_eq!(err, KeyError::MissingName);

        let err = ReconcileKey::from_object(&deployment(Some("default"), Some(""))).unwrap_err();
        assert_eq!(err, KeyError::MissingName);
    }

    #[test]
    fn test_from_object_missing_namespace() {
        let err = ReconcileKey::from_object(&deployment(None, Some("web"))).unwrap_err();
        assert_eq!(err, KeyError::MissingNamespace("web".to_string()));
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            "kube-system/coredns".parse::<ReconcileKey>().unwrap(),
            ReconcileKey::new("kube-system", "coredns")
        );
        for bad in ["web", "/web", "default/", "a/b/c", ""] {
            assert!(
                matches!(bad.parse::<ReconcileKey>(), Err(KeyError::Malformed(_))),
                "{bad:?} should not parse"
            );
        }
    }
}
