//! The namespace registry contract (§6): create/get/list/delete namespace
//! configurations. Like [`crate::store`], this is an external collaborator
//! contract plus an in-memory reference implementation.

use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::namespace::{validate_name, NamespaceConfig};

/// What the core expects from the external namespace registry (§6).
pub trait NamespaceRegistry: Send + Sync {
    /// Registers a new namespace.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidNamespaceName`] if the name fails validation,
    /// or [`Error::NamespaceExists`] if it is already registered.
    fn create(&self, config: NamespaceConfig) -> Result<()>;

    /// Fetches a namespace's configuration by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceNotFound`] if no such namespace exists.
    fn get(&self, name: &str) -> Result<NamespaceConfig>;

    /// Lists every registered namespace name.
    fn list(&self) -> Vec<String>;

    /// Removes a namespace's configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceNotFound`] if no such namespace exists.
    fn delete(&self, name: &str) -> Result<()>;
}

/// An in-memory [`NamespaceRegistry`], used by this crate's tests.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    namespaces: DashMap<String, NamespaceConfig>,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl NamespaceRegistry for InMemoryRegistry {
    fn create(&self, config: NamespaceConfig) -> Result<()> {
        validate_name(&config.name)?;
        if self.namespaces.contains_key(&config.name) {
            return Err(Error::NamespaceExists(config.name));
        }
        self.namespaces.insert(config.name.clone(), config);
        Ok(())
    }

    fn get(&self, name: &str) -> Result<NamespaceConfig> {
        self.namespaces
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::NamespaceNotFound(name.to_string()))
    }

    fn list(&self) -> Vec<String> {
        self.namespaces.iter().map(|e| e.key().clone()).collect()
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.namespaces
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::NamespaceNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceMetric;

    fn cfg(name: &str) -> NamespaceConfig {
        NamespaceConfig::new(name, 8, DistanceMetric::Cosine).unwrap()
    }

    #[test]
    fn create_then_get_round_trips() {
        let registry = InMemoryRegistry::new();
        registry.create(cfg("tenant-a")).unwrap();
        let got = registry.get("tenant-a").unwrap();
        assert_eq!(got.dimension, 8);
    }

    #[test]
    fn create_twice_is_exists_error() {
        let registry = InMemoryRegistry::new();
        registry.create(cfg("tenant-a")).unwrap();
        assert!(matches!(registry.create(cfg("tenant-a")), Err(Error::NamespaceExists(_))));
    }

    #[test]
    fn get_missing_is_not_found() {
        let registry = InMemoryRegistry::new();
        assert!(matches!(registry.get("nope"), Err(Error::NamespaceNotFound(_))));
    }

    #[test]
    fn list_returns_all_names() {
        let registry = InMemoryRegistry::new();
        registry.create(cfg("tenant-a")).unwrap();
        registry.create(cfg("tenant-b")).unwrap();
        let mut names = registry.list();
        names.sort();
        assert_eq!(names, vec!["tenant-a".to_string(), "tenant-b".to_string()]);
    }

    #[test]
    fn delete_removes_namespace() {
        let registry = InMemoryRegistry::new();
        registry.create(cfg("tenant-a")).unwrap();
        registry.delete("tenant-a").unwrap();
        assert!(registry.get("tenant-a").is_err());
    }

    #[test]
    fn delete_missing_is_not_found() {
        let registry = InMemoryRegistry::new();
        assert!(matches!(registry.delete("nope"), Err(Error::NamespaceNotFound(_))));
    }
}
