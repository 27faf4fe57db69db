//! Backend registry: a typed, immutable catalog of invocable classifiers.
//!
//! Built once at startup via `RegistryBuilder`, read-only at request time,
//! so concurrent readers need no synchronization. Registration order is
//! preserved and used for deterministic tie-breaking downstream.

use crate::backend::{BackendDescriptor, ClassifierBackend};
use crate::error::OrchestratorError;
use std::sync::Arc;

pub struct BackendRegistry {
    backends: Vec<Arc<dyn ClassifierBackend>>,
}

impl BackendRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            backends: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ClassifierBackend>> {
        self.backends.iter()
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ClassifierBackend>> {
        self.backends
            .iter()
            .find(|b| b.descriptor().id == id)
            .cloned()
    }

    pub fn descriptor(&self, id: &str) -> Option<&BackendDescriptor> {
        self.backends
            .iter()
            .map(|b| b.descriptor())
            .find(|d| d.id == id)
    }

    /// All backends whose capability set includes `task`, in registration order.
    pub fn supporting(&self, task: &str) -> Vec<Arc<dyn ClassifierBackend>> {
        self.backends
            .iter()
            .filter(|b| b.descriptor().supports(task))
            .cloned()
            .collect()
    }

    /// Position in registration order, used for consensus tie-breaking.
    pub fn registration_index(&self, id: &str) -> Option<usize> {
        self.backends.iter().position(|b| b.descriptor().id == id)
    }

    pub fn descriptors(&self) -> Vec<&BackendDescriptor> {
        self.backends.iter().map(|b| b.descriptor()).collect()
    }
}

pub struct RegistryBuilder {
    backends: Vec<Arc<dyn ClassifierBackend>>,
}

impl RegistryBuilder {
    pub fn register(mut self, backend: Arc<dyn ClassifierBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Finalize. Duplicate ids are rejected: the registry is the single
    /// source of truth for backend identity.
    pub fn build(self) -> Result<BackendRegistry, OrchestratorError> {
        for (i, b) in self.backends.iter().enumerate() {
            let id = &b.descriptor().id;
            if self.backends[..i].iter().any(|o| &o.descriptor().id == id) {
                return Err(OrchestratorError::DuplicateBackend(id.clone()));
            }
        }
        Ok(BackendRegistry {
            backends: self.backends,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendDescriptor, FakeBackend, Tier};

    fn fake(id: &str, tier: Tier, weight: f64, tasks: &[&str]) -> Arc<dyn ClassifierBackend> {
        Arc::new(FakeBackend::succeeding(
            BackendDescriptor::new(id, tier, weight).with_capabilities(tasks),
            "X",
            0.9,
        ))
    }

    #[test]
    fn test_registry_preserves_order() {
        let registry = BackendRegistry::builder()
            .register(fake("a", Tier::PrimaryRemote, 0.4, &["t1"]))
            .register(fake("b", Tier::Local, 0.3, &["t1"]))
            .register(fake("c", Tier::Local, 0.3, &["t2"]))
            .build()
            .unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.registration_index("a"), Some(0));
        assert_eq!(registry.registration_index("c"), Some(2));
        assert_eq!(registry.registration_index("missing"), None);
    }

    #[test]
    fn test_registry_supporting_filters_by_task() {
        let registry = BackendRegistry::builder()
            .register(fake("a", Tier::PrimaryRemote, 0.4, &["t1", "t2"]))
            .register(fake("b", Tier::Local, 0.3, &["t1"]))
            .register(fake("c", Tier::Local, 0.3, &["t2"]))
            .build()
            .unwrap();

        let t1: Vec<String> = registry
            .supporting("t1")
            .iter()
            .map(|b| b.descriptor().id.clone())
            .collect();
        assert_eq!(t1, vec!["a", "b"]);
        assert!(registry.supporting("t3").is_empty());
    }

    #[test]
    fn test_registry_rejects_duplicate_ids() {
        let result = BackendRegistry::builder()
            .register(fake("a", Tier::Local, 0.3, &["t1"]))
            .register(fake("a", Tier::Local, 0.3, &["t1"]))
            .build();

        assert!(matches!(
            result,
            Err(OrchestratorError::DuplicateBackend(id)) if id == "a"
        ));
    }
}
