//! Replicated timeline document.
//!
//! This module provides [`TimelineDoc`], which wraps a yrs [`Doc`] holding a
//! project's timeline as a conflict-free replicated data type.
//!
//! # Structure
//!
//! ```text
//! Y.Doc
//! ├── Y.Map "timeline"        { name }
//! └── Y.Array "tracks"
//!     └── Y.Map               { name, kind, clips: Y.Array }
//!         └── Y.Map           { id, name, media_url, start, duration }
//! ```
//!
//! Sequence elements are ordered by yrs item ids, which are
//! `(client_id, clock)` pairs, so concurrent inserts at the same index keep
//! both elements in one order on every replica. Deleted elements stay in the
//! delete set as tombstones so late updates cannot resurrect them.
//!
//! # Synchronization
//!
//! [`encode_update`](TimelineDoc::encode_update) produces the full state and
//! [`encode_diff`](TimelineDoc::encode_diff) the delta missing from a remote
//! state vector. [`apply_update`](TimelineDoc::apply_update) merges either
//! form; merging is commutative, associative and idempotent.

use std::collections::HashMap;
use std::sync::Arc;

use yrs::types::ToJson;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Any, Array, ArrayRef, Doc, MapRef, ReadTxn, StateVector, Transact, TransactionMut, Update};

use crate::error::{ReelSyncError, Result};

/// The name of the Y.Array containing tracks.
pub const TRACKS_NAME: &str = "tracks";

/// The name of the Y.Map containing timeline-level properties.
pub const TIMELINE_MAP_NAME: &str = "timeline";

/// A replicated timeline document.
///
/// Root types are resolved once at construction. yrs opens its own write
/// transaction to create a root type, so [`sequence`](Self::sequence) and
/// [`map`](Self::map) must not be called from inside
/// [`transact`](Self::transact) or [`read`](Self::read).
pub struct TimelineDoc {
    /// The underlying yrs document
    doc: Doc,

    /// Reference to the tracks sequence (cached)
    tracks: ArrayRef,

    /// Reference to the timeline properties map (cached)
    meta: MapRef,
}

impl TimelineDoc {
    /// Create an empty document with a random replica id.
    pub fn new() -> Self {
        Self::from_doc(Doc::new())
    }

    /// Create an empty document with a fixed replica id.
    ///
    /// Two live replicas must never share an id.
    pub fn with_client_id(client_id: u64) -> Self {
        Self::from_doc(Doc::with_client_id(client_id))
    }

    /// Create a document from a stored or received state blob.
    pub fn from_update(update: &[u8]) -> Result<Self> {
        let doc = Self::new();
        doc.apply_update(update)?;
        Ok(doc)
    }

    fn from_doc(doc: Doc) -> Self {
        let tracks = doc.get_or_insert_array(TRACKS_NAME);
        let meta = doc.get_or_insert_map(TIMELINE_MAP_NAME);
        Self { doc, tracks, meta }
    }

    /// Get the underlying yrs document.
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// The replica id this document writes with.
    pub fn client_id(&self) -> u64 {
        self.doc.client_id()
    }

    /// The `tracks` sequence.
    pub fn tracks(&self) -> &ArrayRef {
        &self.tracks
    }

    /// The `timeline` properties map.
    pub fn meta(&self) -> &MapRef {
        &self.meta
    }

    /// Get or create a root sequence by name.
    pub fn sequence(&self, name: &str) -> ArrayRef {
        self.doc.get_or_insert_array(name)
    }

    /// Get or create a root map by name.
    pub fn map(&self, name: &str) -> MapRef {
        self.doc.get_or_insert_map(name)
    }

    /// Number of tracks currently in the document.
    pub fn track_count(&self) -> u32 {
        let txn = self.doc.transact();
        self.tracks.len(&txn)
    }

    // ==================== Transactions ====================

    /// Run `f` inside one write transaction.
    ///
    /// Everything `f` changes is committed together and travels as one update.
    pub fn transact<R>(&self, f: impl FnOnce(&mut TransactionMut<'_>) -> R) -> R {
        let mut txn = self.doc.transact_mut();
        f(&mut txn)
    }

    /// Like [`transact`](Self::transact), also returning the update that
    /// carries the transaction's changes to other replicas.
    pub fn transact_tracking<R>(
        &self,
        f: impl FnOnce(&mut TransactionMut<'_>) -> R,
    ) -> (R, Vec<u8>) {
        let sv_before = self.state_vector();

        let result = {
            let mut txn = self.doc.transact_mut();
            f(&mut txn)
        };

        let update = {
            let txn = self.doc.transact();
            txn.encode_state_as_update_v1(&sv_before)
        };

        (result, update)
    }

    /// Run `f` inside a read-only transaction.
    pub fn read<R>(&self, f: impl FnOnce(&yrs::Transaction<'_>) -> R) -> R {
        let txn = self.doc.transact();
        f(&txn)
    }

    // ==================== Sync Operations ====================

    /// The current state vector.
    pub fn state_vector(&self) -> StateVector {
        let txn = self.doc.transact();
        txn.state_vector()
    }

    /// Encode the current state vector for a sync handshake.
    pub fn encode_state_vector(&self) -> Vec<u8> {
        self.state_vector().encode_v1()
    }

    /// Encode the full document state as an update.
    pub fn encode_update(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Encode only the updates a peer with `remote_state_vector` is missing.
    pub fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(remote_state_vector).map_err(|e| {
            ReelSyncError::MalformedUpdate(format!("Failed to decode state vector: {}", e))
        })?;

        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// Merge an update from another replica.
    ///
    /// The bytes are fully decoded before the document is touched, so a
    /// malformed update is rejected without changing any state.
    pub fn apply_update(&self, update: &[u8]) -> Result<()> {
        let decoded = Update::decode_v1(update).map_err(|e| {
            ReelSyncError::MalformedUpdate(format!("Failed to decode update: {}", e))
        })?;

        let mut txn = self.doc.transact_mut();
        txn.apply_update(decoded)
            .map_err(|e| ReelSyncError::MalformedUpdate(format!("Failed to apply update: {}", e)))
    }

    /// Materialize the replicated content as plain values.
    ///
    /// Two replicas that have seen the same set of updates produce equal values.
    pub fn materialize(&self) -> Any {
        let txn = self.doc.transact();
        let mut root = HashMap::new();
        root.insert(TRACKS_NAME.to_string(), self.tracks.to_json(&txn));
        root.insert(TIMELINE_MAP_NAME.to_string(), self.meta.to_json(&txn));
        Any::Map(Arc::new(root))
    }

    // ==================== Observers ====================

    /// Subscribe to committed updates.
    ///
    /// The callback receives the binary update produced by every transaction
    /// that changed the document, local or remote. Dropping the returned
    /// subscription unsubscribes.
    pub fn observe_updates<F>(&self, callback: F) -> Result<yrs::Subscription>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.doc
            .observe_update_v1(move |_txn, event| {
                callback(&event.update);
            })
            .map_err(|e| ReelSyncError::Observe(e.to_string()))
    }
}

impl Default for TimelineDoc {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TimelineDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineDoc")
            .field("client_id", &self.client_id())
            .field("track_count", &self.track_count())
            .finish()
    }
}
