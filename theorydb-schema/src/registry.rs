//! The frozen model registry.

use crate::Model;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use theorydb_core::{ModelDescriptor, TheoryError, TheoryResult};

/// Registry of frozen model descriptors.
///
/// Registration is single-writer / many-reader: a new descriptor is
/// validated, then published by swapping an `Arc` snapshot of the whole
/// map. Lookups clone the snapshot under a read lock and never observe a
/// partially registered model. Descriptors themselves are immutable once
/// published.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    models: RwLock<Arc<HashMap<String, Arc<ModelDescriptor>>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and publish a descriptor.
    ///
    /// Re-registering a name with an identical descriptor is an idempotent
    /// no-op returning the already-published copy; any difference fails
    /// with `InvalidModel`.
    pub fn register(&self, descriptor: ModelDescriptor) -> TheoryResult<Arc<ModelDescriptor>> {
        descriptor.validate()?;

        let mut guard = self.models.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = guard.get(&descriptor.name) {
            if **existing == descriptor {
                return Ok(Arc::clone(existing));
            }
            return Err(TheoryError::InvalidModel {
                model: descriptor.name,
                reason: "a different descriptor is already registered under this name".into(),
            });
        }

        let published = Arc::new(descriptor);
        let mut next: HashMap<String, Arc<ModelDescriptor>> = (**guard).clone();
        next.insert(published.name.clone(), Arc::clone(&published));
        *guard = Arc::new(next);
        Ok(published)
    }

    /// Register the descriptor a [`Model`] declares.
    pub fn register_model<T: Model>(&self) -> TheoryResult<Arc<ModelDescriptor>> {
        self.register(T::descriptor())
    }

    /// Fetch a published descriptor by model name.
    pub fn lookup(&self, name: &str) -> TheoryResult<Arc<ModelDescriptor>> {
        let snapshot = Arc::clone(&self.models.read().unwrap_or_else(|e| e.into_inner()));
        snapshot
            .get(name)
            .cloned()
            .ok_or_else(|| TheoryError::InvalidModel {
                model: name.to_string(),
                reason: "model is not registered".into(),
            })
    }

    /// Names of every registered model.
    pub fn model_names(&self) -> Vec<String> {
        let snapshot = Arc::clone(&self.models.read().unwrap_or_else(|e| e.into_inner()));
        let mut names: Vec<String> = snapshot.keys().cloned().collect();
        names.sort();
        names
    }
}
