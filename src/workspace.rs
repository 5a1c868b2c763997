//! Shared workspace agents use to hand off intermediate artifacts within a
//! mission — a key/value store scoped per mission, backed by the same
//! store as the message bus.

use std::sync::Arc;

use crate::error::StorageError;
use crate::storage::Store;
use crate::types::WorkspaceEntry;

pub struct SharedWorkspace {
    store: Arc<dyn Store>,
}

impl SharedWorkspace {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn post(&self, mission_id: &str, key: &str, written_by: &str, value: serde_json::Value) -> Result<(), StorageError> {
        let entry = WorkspaceEntry::new(key, mission_id, written_by, value);
        self.store.save_workspace_entry(&entry)
    }

    pub fn read(&self, mission_id: &str, key: &str) -> Result<Option<WorkspaceEntry>, StorageError> {
        self.store.load_workspace_entry(mission_id, key)
    }
}
