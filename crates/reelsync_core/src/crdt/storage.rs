//! Storage abstraction for document persistence.
//!
//! This module defines the [`CrdtStorage`] trait which abstracts over the
//! backends (SQLite, in-memory) that keep encoded timeline documents between
//! process restarts.

use crate::error::ReelSyncError;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, ReelSyncError>;

/// Trait for document storage backends.
///
/// A backend stores one opaque blob per document name: the full encoded
/// state of a [`TimelineDoc`](super::TimelineDoc). It never interprets the
/// bytes beyond what it needs for bookkeeping.
pub trait CrdtStorage: Send + Sync {
    /// Load the full document state as a binary blob.
    ///
    /// Returns `None` if the document was never saved.
    fn load_doc(&self, name: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Save the full document state.
    ///
    /// This replaces any existing state for the document. Saving the same
    /// bytes twice leaves storage as if they were saved once.
    fn save_doc(&self, name: &str, state: &[u8]) -> StorageResult<()>;

    /// Delete a document. Deleting a missing document is not an error.
    fn delete_doc(&self, name: &str) -> StorageResult<()>;

    /// List all document names in storage.
    fn list_docs(&self) -> StorageResult<Vec<String>>;
}
