use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;
use tracing::debug;

use crate::entity::{Entity, EntityDescriptor, SchemaBuilder};
use crate::error::{OrmError, Result};

static GLOBAL: Lazy<Arc<Registry>> = Lazy::new(|| Arc::new(Registry::new()));

/// Lazily populated cache of entity descriptors, keyed by type.
///
/// Entries are never invalidated; use a fresh registry to describe a type
/// differently. A failed description is not cached.
#[derive(Default)]
pub struct Registry {
    descriptors: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<Registry> {
        Arc::clone(&GLOBAL)
    }

    /// Descriptor for `E`, built on first use.
    pub fn describe<E: Entity>(&self) -> Result<Arc<EntityDescriptor<E>>> {
        let id = TypeId::of::<E>();
        {
            let cache = self.descriptors.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(found) = cache.get(&id) {
                return downcast(Arc::clone(found));
            }
        }

        let mut cache = self.descriptors.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have won the race for the write lock.
        if let Some(found) = cache.get(&id) {
            return downcast(Arc::clone(found));
        }
        let mut builder = SchemaBuilder::<E>::new();
        E::schema(&mut builder);
        let descriptor = Arc::new(builder.finish()?);
        debug!(
            entity = descriptor.entity_name(),
            table = descriptor.table_name(),
            columns = descriptor.column_names().len(),
            relationships = descriptor.relationships().len(),
            "registered entity"
        );
        cache.insert(id, Arc::clone(&descriptor) as Arc<dyn Any + Send + Sync>);
        Ok(descriptor)
    }

    pub fn is_described<E: Entity>(&self) -> bool {
        self.descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&TypeId::of::<E>())
    }

    pub fn len(&self) -> usize {
        self.descriptors.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("entities", &self.len()).finish()
    }
}

fn downcast<E: Entity>(any: Arc<dyn Any + Send + Sync>) -> Result<Arc<EntityDescriptor<E>>> {
    any.downcast::<EntityDescriptor<E>>().map_err(|_| {
        OrmError::schema(format!(
            "registry entry for {} has the wrong type",
            std::any::type_name::<E>()
        ))
    })
}
