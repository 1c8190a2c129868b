//! Replicated timeline documents.
//!
//! [`TimelineDoc`] is the mergeable container, [`to_replicated`] and
//! [`from_replicated`] translate it to and from the [`Timeline`](crate::timeline::Timeline)
//! domain model, and [`CrdtStorage`] persists its encoded state.

mod memory_storage;
mod schema;
#[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
mod sqlite_storage;
mod storage;
mod timeline_doc;

pub use memory_storage::MemoryStorage;
pub use schema::{from_replicated, to_replicated};
#[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
pub use sqlite_storage::SqliteStorage;
pub use storage::{CrdtStorage, StorageResult};
pub use timeline_doc::{TIMELINE_MAP_NAME, TRACKS_NAME, TimelineDoc};
