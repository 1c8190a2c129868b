//! In-memory storage implementation.
//!
//! Used by tests and by servers started without a database path.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::storage::{CrdtStorage, StorageResult};
use crate::error::ReelSyncError;

/// In-memory document storage.
///
/// Thread-safe via `RwLock`; everything is lost when the last clone is
/// dropped. Clones share the same underlying map.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    /// Document snapshots (name -> stored state)
    docs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

fn poisoned<T>(_: T) -> ReelSyncError {
    ReelSyncError::Storage("memory storage lock poisoned".to_string())
}

impl MemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CrdtStorage for MemoryStorage {
    fn load_doc(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs.get(name).cloned())
    }

    fn save_doc(&self, name: &str, state: &[u8]) -> StorageResult<()> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        docs.insert(name.to_string(), state.to_vec());
        Ok(())
    }

    fn delete_doc(&self, name: &str) -> StorageResult<()> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        docs.remove(name);
        Ok(())
    }

    fn list_docs(&self) -> StorageResult<Vec<String>> {
        let docs = self.docs.read().map_err(poisoned)?;
        let mut names: Vec<String> = docs.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
