//! Runtime-wide index of the instances hosted here.
//!
//! Written only when an instance is placed or removed; read when a control
//! command resolves a local endpoint, when a frame arrives from a peer, and
//! when the control plane addresses an instance.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use weave_api::{ControlMsg, MsuId, MsuMessage, MsuTypeId};

use crate::error::CreateError;
use crate::queue::QueueHandle;

/// Where an instance lives and how to reach its queues.
#[derive(Clone, Debug)]
pub struct DirectoryEntry {
    pub type_id: MsuTypeId,
    pub worker: usize,
    pub data: QueueHandle<MsuMessage>,
    pub ctrl: QueueHandle<ControlMsg>,
}

#[derive(Debug, Default)]
pub struct Directory {
    entries: RwLock<HashMap<MsuId, DirectoryEntry>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `msu`. Instance ids are unique within a runtime.
    pub fn insert(&self, msu: MsuId, entry: DirectoryEntry) -> Result<(), CreateError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&msu) {
            return Err(CreateError::DuplicateId(msu));
        }
        entries.insert(msu, entry);
        Ok(())
    }

    pub fn remove(&self, msu: MsuId) -> Option<DirectoryEntry> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&msu)
    }

    pub fn get(&self, msu: MsuId) -> Option<DirectoryEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&msu)
            .cloned()
    }

    pub fn data_queue(&self, msu: MsuId) -> Option<QueueHandle<MsuMessage>> {
        self.get(msu).map(|entry| entry.data)
    }

    pub fn ctrl_queue(&self, msu: MsuId) -> Option<QueueHandle<ControlMsg>> {
        self.get(msu).map(|entry| entry.ctrl)
    }

    pub fn contains(&self, msu: MsuId) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&msu)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Instance ids, sorted.
    pub fn msu_ids(&self) -> Vec<MsuId> {
        let mut ids: Vec<MsuId> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }
}
