//! Test utilities for the sync layer

use reelsync_core::ReelSyncError;
use reelsync_core::crdt::{CrdtStorage, MemoryStorage, StorageResult};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Storage that fails a set number of loads and saves before delegating to
/// an in-memory store.
///
/// Clones of `inner` see the same documents, so tests can seed and inspect
/// storage behind the failures.
#[derive(Default)]
pub struct FlakyStorage {
    pub inner: MemoryStorage,
    load_failures_left: Mutex<u32>,
    save_failures_left: Mutex<u32>,
    pub load_attempts: AtomicUsize,
    pub save_attempts: AtomicUsize,
}

impl FlakyStorage {
    pub fn new(inner: MemoryStorage) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// Fail the next `failures` saves.
    pub fn failing_saves(self, failures: u32) -> Self {
        *self.save_failures_left.lock().unwrap() = failures;
        self
    }

    /// Fail the next `failures` loads.
    pub fn failing_loads(self, failures: u32) -> Self {
        *self.load_failures_left.lock().unwrap() = failures;
        self
    }

    fn take_failure(counter: &Mutex<u32>) -> bool {
        let mut left = counter.lock().unwrap();
        if *left > 0 {
            *left -= 1;
            true
        } else {
            false
        }
    }
}

impl CrdtStorage for FlakyStorage {
    fn load_doc(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        self.load_attempts.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.load_failures_left) {
            return Err(ReelSyncError::Storage("database is locked".to_string()));
        }
        self.inner.load_doc(name)
    }

    fn save_doc(&self, name: &str, state: &[u8]) -> StorageResult<()> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.save_failures_left) {
            return Err(ReelSyncError::Storage("disk unavailable".to_string()));
        }
        self.inner.save_doc(name, state)
    }

    fn delete_doc(&self, name: &str) -> StorageResult<()> {
        self.inner.delete_doc(name)
    }

    fn list_docs(&self) -> StorageResult<Vec<String>> {
        self.inner.list_docs()
    }
}
