//! Registered MSU types.
//!
//! Types are registered while the runtime is being assembled and the
//! registry is frozen behind an `Arc` once the runtime starts, so lookups
//! take no lock.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};
use weave_api::MsuTypeId;

use crate::error::RegistryError;
use crate::msu::{catch_panic, MsuType};

#[derive(Default)]
pub struct TypeRegistry {
    types: HashMap<MsuTypeId, Arc<dyn MsuType>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `msu_type` and runs its `init_type` capability. A type whose
    /// initialization fails is not registered.
    pub fn register(&mut self, msu_type: Arc<dyn MsuType>) -> Result<(), RegistryError> {
        let type_id = msu_type.id();
        if self.types.contains_key(&type_id) {
            warn!(type_id = %type_id, type_name = msu_type.name(), "type registered twice");
            return Err(RegistryError::DuplicateType(type_id));
        }
        catch_panic("init_type", || msu_type.init_type())
            .and_then(|r| r)
            .map_err(|source| RegistryError::TypeInitFailed { type_id, source })?;
        info!(type_id = %type_id, type_name = msu_type.name(), "registered type");
        self.types.insert(type_id, msu_type);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_type(mut self, msu_type: impl MsuType) -> Result<Self, RegistryError> {
        self.register(Arc::new(msu_type))?;
        Ok(self)
    }

    pub fn lookup(&self, type_id: MsuTypeId) -> Option<Arc<dyn MsuType>> {
        self.types.get(&type_id).cloned()
    }

    pub fn contains(&self, type_id: MsuTypeId) -> bool {
        self.types.contains_key(&type_id)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Registered ids, sorted.
    pub fn type_ids(&self) -> Vec<MsuTypeId> {
        let mut ids: Vec<_> = self.types.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Runs `destroy_type` on every registered type.
    pub fn destroy_all(&self) {
        for type_id in self.type_ids() {
            if let Some(msu_type) = self.types.get(&type_id) {
                debug!(type_id = %type_id, type_name = msu_type.name(), "destroying type");
                if let Err(err) = catch_panic("destroy_type", || msu_type.destroy_type()) {
                    warn!(type_id = %type_id, type_name = msu_type.name(), error = %err, "destroy_type failed");
                }
            }
        }
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.type_ids())
            .finish()
    }
}
