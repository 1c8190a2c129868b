use chrono::{DateTime, Utc};
use reelsync_core::crdt::{CrdtStorage, TimelineDoc, from_replicated, to_replicated};
use reelsync_core::{ActionOutcome, AgentAction, ReelSyncError, Timeline};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, RwLock, broadcast};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::protocol::ServerMessage;
use super::registry::SessionConfig;

/// Identifies one WebSocket connection for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A frame fanned out to the connections of a project
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Binary(Vec<u8>),
    Text(String),
}

/// A broadcast frame together with the connection that caused it.
///
/// Receivers skip events whose origin is themselves.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub origin: Option<ConnectionId>,
    pub frame: Frame,
}

/// Presence entry for one connected user. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Presence {
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
}

/// The live state of one project
pub struct ProjectSession {
    project_id: String,
    /// The replicated timeline; the write lock admits one mutation at a time
    doc: RwLock<TimelineDoc>,
    /// Fan-out of updates and control messages to every connection
    broadcast_tx: broadcast::Sender<SessionEvent>,
    /// Connected users, keyed by connection
    presence: Mutex<HashMap<ConnectionId, Presence>>,
    /// Number of subscribed connections
    connection_count: AtomicUsize,
    /// Bumped on every accepted mutation
    version: AtomicU64,
    /// Last version known to be in storage
    saved_version: AtomicU64,
    /// Serializes saves so an older state never overwrites a newer one
    save_lock: AsyncMutex<()>,
    /// Milliseconds since the epoch of the last access
    last_activity: AtomicI64,
    storage: Arc<dyn CrdtStorage>,
    save_max_attempts: u32,
    save_retry_backoff: Duration,
}

impl ProjectSession {
    /// Create a session around an existing document.
    ///
    /// `dirty` marks the document as not yet in storage.
    pub fn new(
        project_id: &str,
        doc: TimelineDoc,
        dirty: bool,
        storage: Arc<dyn CrdtStorage>,
        config: &SessionConfig,
    ) -> Self {
        let (broadcast_tx, _) = broadcast::channel(config.broadcast_capacity.max(1));

        Self {
            project_id: project_id.to_string(),
            doc: RwLock::new(doc),
            broadcast_tx,
            presence: Mutex::new(HashMap::new()),
            connection_count: AtomicUsize::new(0),
            version: AtomicU64::new(u64::from(dirty)),
            saved_version: AtomicU64::new(0),
            save_lock: AsyncMutex::new(()),
            last_activity: AtomicI64::new(Utc::now().timestamp_millis()),
            storage,
            save_max_attempts: config.save_max_attempts.max(1),
            save_retry_backoff: config.save_retry_backoff,
        }
    }

    /// Load a project from storage, or start it with one default track.
    ///
    /// A failed read is retried with backoff and then returned as an error,
    /// so an unreadable project is never replaced by an empty one. A stored
    /// blob that fails to decode is logged and left in storage; the session
    /// starts from the default timeline and only overwrites the blob once
    /// something is merged into it.
    pub async fn load(
        project_id: &str,
        storage: Arc<dyn CrdtStorage>,
        config: &SessionConfig,
    ) -> Result<Self, ReelSyncError> {
        match load_with_retry(project_id, storage.as_ref(), config).await? {
            Some(state) => match TimelineDoc::from_update(&state) {
                Ok(doc) => {
                    info!(
                        "Loaded project {} from storage ({} bytes)",
                        project_id,
                        state.len()
                    );
                    Ok(Self::new(project_id, doc, false, storage, config))
                }
                Err(e) => {
                    error!("Stored state for project {} is corrupt: {}", project_id, e);
                    Ok(Self::new(project_id, default_doc(project_id), false, storage, config))
                }
            },
            None => {
                info!("Creating new project {}", project_id);
                Ok(Self::new(project_id, default_doc(project_id), true, storage, config))
            }
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    // ==================== Connections ====================

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.connection_count.fetch_add(1, Ordering::SeqCst);
        self.touch();
        self.broadcast_tx.subscribe()
    }

    /// Unsubscribe from session events
    pub fn unsubscribe(&self) {
        self.connection_count.fetch_sub(1, Ordering::SeqCst);
        self.touch();
    }

    /// Get the number of active connections
    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::SeqCst)
    }

    /// Add a user to the presence registry and announce them to the other peers.
    pub fn join(&self, connection: ConnectionId, user_id: &str) -> usize {
        let peer_count = {
            let mut presence = self.presence.lock().unwrap_or_else(PoisonError::into_inner);
            presence.insert(
                connection,
                Presence {
                    user_id: user_id.to_string(),
                    joined_at: Utc::now(),
                },
            );
            presence.len()
        };

        self.broadcast_control(
            Some(connection),
            ServerMessage::PeerJoined {
                user_id: user_id.to_string(),
                peer_count,
            },
        );
        peer_count
    }

    /// Remove a connection from the presence registry. The document is untouched.
    pub fn leave(&self, connection: ConnectionId) {
        let (removed, peer_count) = {
            let mut presence = self.presence.lock().unwrap_or_else(PoisonError::into_inner);
            let removed = presence.remove(&connection);
            (removed, presence.len())
        };

        if let Some(entry) = removed {
            self.broadcast_control(
                Some(connection),
                ServerMessage::PeerLeft {
                    user_id: entry.user_id,
                    peer_count,
                },
            );
        }
    }

    /// Snapshot of the presence registry
    pub fn presence(&self) -> Vec<Presence> {
        let presence = self.presence.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<Presence> = presence.values().cloned().collect();
        entries.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        entries
    }

    pub fn is_present(&self, connection: ConnectionId) -> bool {
        let presence = self.presence.lock().unwrap_or_else(PoisonError::into_inner);
        presence.contains_key(&connection)
    }

    // ==================== Broadcast ====================

    /// Send a frame to every connection except `origin`
    pub fn broadcast(&self, origin: Option<ConnectionId>, frame: Frame) {
        // An error only means nobody is listening.
        let _ = self.broadcast_tx.send(SessionEvent { origin, frame });
    }

    fn broadcast_control(&self, origin: Option<ConnectionId>, msg: ServerMessage) {
        self.broadcast(origin, Frame::Text(msg.to_json()));
    }

    // ==================== Document ====================

    /// Full encoded state for initial sync and lag recovery
    pub async fn full_state(&self) -> Vec<u8> {
        let doc = self.doc.read().await;
        doc.encode_update()
    }

    /// Domain snapshot of the current document
    pub async fn snapshot(&self) -> Timeline {
        self.touch();
        let doc = self.doc.read().await;
        from_replicated(&doc)
    }

    /// Number of tracks in the document
    pub async fn track_count(&self) -> u32 {
        let doc = self.doc.read().await;
        doc.track_count()
    }

    /// Merge a binary update received from `origin` and fan it out to the
    /// other connections.
    ///
    /// A malformed update is rejected with the document unchanged and nothing
    /// broadcast. Returns the number of bytes merged.
    pub async fn apply_update(
        &self,
        origin: Option<ConnectionId>,
        update: &[u8],
    ) -> Result<usize, ReelSyncError> {
        self.touch();
        {
            let doc = self.doc.write().await;
            doc.apply_update(update)?;
            self.version.fetch_add(1, Ordering::SeqCst);
        }

        self.broadcast(origin, Frame::Binary(update.to_vec()));
        self.persist_logged().await;
        Ok(update.len())
    }

    /// Apply an agent action as one transaction and fan the result out.
    pub async fn apply_action(&self, action: &AgentAction) -> Result<ActionOutcome, ReelSyncError> {
        self.touch();
        let (outcome, update) = {
            let doc = self.doc.write().await;
            let mut timeline = from_replicated(&doc);
            let outcome = action.apply(&mut timeline)?;
            let update = to_replicated(&mut timeline, &doc);
            if update.is_some() {
                self.version.fetch_add(1, Ordering::SeqCst);
            }
            (outcome, update)
        };

        if let Some(update) = update {
            debug!(
                "Action {} on project {} produced {} bytes",
                action.tag(),
                self.project_id,
                update.len()
            );
            self.broadcast(None, Frame::Binary(update));
            self.persist_logged().await;
        }

        Ok(outcome)
    }

    #[cfg(test)]
    pub(crate) async fn lock_doc(&self) -> tokio::sync::RwLockWriteGuard<'_, TimelineDoc> {
        self.doc.write().await
    }

    // ==================== Persistence ====================

    /// Whether merged changes have not reached storage yet
    pub fn is_dirty(&self) -> bool {
        self.version.load(Ordering::SeqCst) != self.saved_version.load(Ordering::SeqCst)
    }

    /// Save the current state, retrying with exponential backoff.
    ///
    /// A failure leaves the in-memory document as it is and the session dirty,
    /// so a later call saves it again.
    pub async fn persist(&self) -> Result<(), ReelSyncError> {
        let _guard = self.save_lock.lock().await;

        let version = self.version.load(Ordering::SeqCst);
        if version == self.saved_version.load(Ordering::SeqCst) {
            return Ok(());
        }

        let state = self.full_state().await;
        let mut backoff = self.save_retry_backoff;
        let mut attempt = 1;

        loop {
            match self.storage.save_doc(&self.project_id, &state) {
                Ok(()) => {
                    self.saved_version.store(version, Ordering::SeqCst);
                    debug!(
                        "Saved project {} ({} bytes, version {})",
                        self.project_id,
                        state.len(),
                        version
                    );
                    return Ok(());
                }
                Err(e) if attempt < self.save_max_attempts => {
                    warn!(
                        "Failed to save project {} (attempt {}/{}): {}",
                        self.project_id, attempt, self.save_max_attempts, e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        "Giving up saving project {} after {} attempts: {}",
                        self.project_id, attempt, e
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn persist_logged(&self) {
        // persist() already logged the failure; the session stays dirty for the next flush
        let _ = self.persist().await;
    }

    // ==================== Activity ====================

    /// Mark the session as in use
    pub(crate) fn touch(&self) {
        self.last_activity
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    /// Time since the session was last used
    pub fn idle_for(&self) -> Duration {
        let idle_ms = Utc::now().timestamp_millis() - self.last_activity.load(Ordering::SeqCst);
        Duration::from_millis(idle_ms.max(0) as u64)
    }
}

async fn load_with_retry(
    project_id: &str,
    storage: &dyn CrdtStorage,
    config: &SessionConfig,
) -> Result<Option<Vec<u8>>, ReelSyncError> {
    let max_attempts = config.save_max_attempts.max(1);
    let mut backoff = config.save_retry_backoff;
    let mut attempt = 1;

    loop {
        match storage.load_doc(project_id) {
            Ok(state) => return Ok(state),
            Err(e) if attempt < max_attempts => {
                warn!(
                    "Failed to load project {} (attempt {}/{}): {}",
                    project_id, attempt, max_attempts, e
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(e) => {
                error!(
                    "Giving up loading project {} after {} attempts: {}",
                    project_id, attempt, e
                );
                return Err(e);
            }
        }
    }
}

/// The document a project starts with: one video track named `Track 0`.
fn default_doc(project_id: &str) -> TimelineDoc {
    let doc = TimelineDoc::new();
    let mut timeline = Timeline::with_default_track(format!("Project {}", project_id));
    to_replicated(&mut timeline, &doc);
    doc
}
