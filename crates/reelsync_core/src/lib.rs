//! Core library for ReelSync.
//!
//! ReelSync lets human editors and agents edit one video timeline at the same
//! time without a central lock. This crate holds everything that does not
//! depend on a network stack:
//!
//! - [`timeline`]: the `Timeline → Track → Clip` domain model
//! - [`crdt`]: the replicated document, the mapping to and from the domain
//!   model, and document storage
//! - [`action`]: tagged edits sent by agents
//! - [`error`]: the shared error type

/// Error (common error types)
pub mod error;

/// Timeline domain model
pub mod timeline;

/// Agent actions
pub mod action;

/// Replicated documents and their storage
pub mod crdt;

pub use action::{ActionOutcome, AddClip, AgentAction};
pub use error::{ReelSyncError, Result, SerializableError};
pub use timeline::{Clip, ClipId, RationalTime, Timeline, Track, TrackKind};
