//! Descriptor lookup by entity name.

use crate::descriptor::EntityDescriptor;
use crate::error::{ModelError, ModelResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Resolves entity type names to their descriptors.
///
/// The chain resolver uses this to find the local table of a reference
/// target; the orchestrator uses it to turn registrations into synchers.
pub trait DescriptorProvider: Send + Sync {
    /// Returns the descriptor for `entity`, if known.
    fn descriptor(&self, entity: &str) -> Option<Arc<EntityDescriptor>>;
}

/// A fixed set of descriptors keyed by entity name.
#[derive(Debug, Default, Clone)]
pub struct ModelRegistry {
    descriptors: HashMap<String, Arc<EntityDescriptor>>,
}

impl ModelRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a descriptor. Entity names must be unique.
    pub fn insert(&mut self, descriptor: EntityDescriptor) -> ModelResult<Arc<EntityDescriptor>> {
        let name = descriptor.entity().to_string();
        if self.descriptors.contains_key(&name) {
            return Err(ModelError::DuplicateEntity(name));
        }
        let descriptor = Arc::new(descriptor);
        self.descriptors.insert(name, Arc::clone(&descriptor));
        Ok(descriptor)
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, descriptor: EntityDescriptor) -> ModelResult<Self> {
        self.insert(descriptor)?;
        Ok(self)
    }

    /// Number of registered descriptors.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl DescriptorProvider for ModelRegistry {
    fn descriptor(&self, entity: &str) -> Option<Arc<EntityDescriptor>> {
        self.descriptors.get(entity).cloned()
    }
}
