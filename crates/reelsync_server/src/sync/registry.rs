use reelsync_core::crdt::CrdtStorage;
use reelsync_core::{ActionOutcome, AgentAction, ReelSyncError, Timeline};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::session::ProjectSession;
use crate::config::Config;

/// Tunables for sessions created by a [`SessionRegistry`]
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Attempts per storage load or save; a failed save waits for the next flush
    pub save_max_attempts: u32,
    /// Delay before the first retry; doubled after each failure
    pub save_retry_backoff: Duration,
    /// Sessions unused for this long, with no connections and nothing unsaved, are evicted
    pub idle_timeout: Duration,
    /// Capacity of each session's broadcast channel
    pub broadcast_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            save_max_attempts: 3,
            save_retry_backoff: Duration::from_millis(100),
            idle_timeout: Duration::from_secs(900),
            broadcast_capacity: 1024,
        }
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            save_max_attempts: config.save_max_attempts,
            save_retry_backoff: config.save_retry_backoff,
            idle_timeout: config.session_idle_timeout,
            broadcast_capacity: config.broadcast_capacity,
        }
    }
}

/// Statistics about the registry
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub active_connections: usize,
    pub active_sessions: usize,
    pub dirty_sessions: usize,
}

/// Owns the live session of every open project
pub struct SessionRegistry {
    /// Map of project_id to its session
    sessions: RwLock<HashMap<String, Arc<ProjectSession>>>,
    storage: Arc<dyn CrdtStorage>,
    config: SessionConfig,
}

impl SessionRegistry {
    pub fn new(storage: Arc<dyn CrdtStorage>, config: SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            storage,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn CrdtStorage> {
        &self.storage
    }

    /// Get the session for a project, loading or creating it on first access.
    ///
    /// A project that was never stored starts with one default track. Fails
    /// only if storage cannot be read, in which case nothing is cached and the
    /// next access tries again.
    pub async fn get_or_create_session(
        &self,
        project_id: &str,
    ) -> Result<Arc<ProjectSession>, ReelSyncError> {
        // Check if session exists
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(project_id) {
                session.touch();
                return Ok(session.clone());
            }
        }

        // Load outside the lock so a slow store only delays this project
        let loaded =
            ProjectSession::load(project_id, self.storage.clone(), &self.config).await?;

        let session = {
            let mut sessions = self.sessions.write().await;

            // Double-check after acquiring write lock
            if let Some(session) = sessions.get(project_id) {
                session.touch();
                return Ok(session.clone());
            }

            let session = Arc::new(loaded);
            sessions.insert(project_id.to_string(), session.clone());
            info!("Opened session for project: {}", project_id);
            session
        };

        // Store a freshly created project right away so every later load sees
        // the same default track.
        if session.is_dirty() && session.persist().await.is_err() {
            warn!(
                "Project {} is not in storage yet; it will be saved on the next flush",
                project_id
            );
        }

        Ok(session)
    }

    /// Get an existing session (does not create if not found)
    pub async fn get_session(&self, project_id: &str) -> Option<Arc<ProjectSession>> {
        let sessions = self.sessions.read().await;
        sessions.get(project_id).cloned()
    }

    /// Apply an agent action to a project, creating the project if needed.
    pub async fn apply_agent_action(
        &self,
        project_id: &str,
        action: &AgentAction,
    ) -> Result<ActionOutcome, ReelSyncError> {
        let session = self.get_or_create_session(project_id).await?;
        let outcome = session.apply_action(action).await?;
        info!(
            "Agent {} on project {}: clip {} on track {}",
            action.tag(),
            project_id,
            outcome.clip_id,
            outcome.track
        );
        Ok(outcome)
    }

    /// Domain snapshot of a project, creating the project if needed.
    pub async fn snapshot(&self, project_id: &str) -> Result<Timeline, ReelSyncError> {
        let session = self.get_or_create_session(project_id).await?;
        Ok(session.snapshot().await)
    }

    async fn all_sessions(&self) -> Vec<Arc<ProjectSession>> {
        let sessions = self.sessions.read().await;
        sessions.values().cloned().collect()
    }

    /// Retry saving every session with unsaved changes. Returns how many are still unsaved.
    pub async fn flush_dirty(&self) -> usize {
        let mut still_dirty = 0;
        for session in self.all_sessions().await {
            if session.is_dirty() && session.persist().await.is_err() {
                still_dirty += 1;
            }
        }
        still_dirty
    }

    /// Drop sessions that have no connections, nothing unsaved, and no
    /// activity for `idle_timeout`. The next access reloads them from storage.
    ///
    /// A session still referenced outside the registry is kept, so a caller
    /// holding it never ends up beside a second live copy of the project.
    pub async fn evict_idle(&self, idle_timeout: Duration) -> Vec<String> {
        let mut sessions = self.sessions.write().await;

        let idle: Vec<String> = sessions
            .iter()
            .filter(|(_, session)| {
                Arc::strong_count(session) == 1
                    && session.connection_count() == 0
                    && !session.is_dirty()
                    && session.idle_for() >= idle_timeout
            })
            .map(|(project_id, _)| project_id.clone())
            .collect();

        for project_id in &idle {
            sessions.remove(project_id);
            info!("Evicted idle session: {}", project_id);
        }

        idle
    }

    /// Save every session. Called once on shutdown.
    pub async fn shutdown(&self) {
        let sessions = self.all_sessions().await;
        debug!("Flushing {} sessions", sessions.len());

        let unsaved = self.flush_dirty().await;
        if unsaved > 0 {
            warn!("{} sessions could not be saved before shutdown", unsaved);
        }
    }

    /// Get statistics about the registry
    pub async fn stats(&self) -> SyncStats {
        let sessions = self.sessions.read().await;

        SyncStats {
            active_connections: sessions.values().map(|s| s.connection_count()).sum(),
            active_sessions: sessions.len(),
            dirty_sessions: sessions.values().filter(|s| s.is_dirty()).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::test_utils::FlakyStorage;
    use crate::sync::{ClientConnection, ConnectionState};
    use reelsync_core::crdt::{MemoryStorage, TimelineDoc, from_replicated, to_replicated};
    use reelsync_core::{Clip, RationalTime};
    use serde_json::json;

    fn create_registry() -> (Arc<MemoryStorage>, SessionRegistry) {
        let storage = Arc::new(MemoryStorage::new());
        let registry = SessionRegistry::new(
            storage.clone(),
            SessionConfig {
                save_retry_backoff: Duration::from_millis(1),
                ..SessionConfig::default()
            },
        );
        (storage, registry)
    }

    fn add_clip_json(name: &str, url: &str, track: usize) -> serde_json::Value {
        json!({
            "type": "add_clip",
            "name": name,
            "url": url,
            "start": 0,
            "duration": 5,
            "track": track
        })
    }

    #[tokio::test]
    async fn test_add_clip_to_fresh_project() {
        let (_, registry) = create_registry();
        let action = AgentAction::from_json(add_clip_json("A", "u1", 0)).unwrap();

        registry.apply_agent_action("p1", &action).await.unwrap();

        let snapshot = registry.snapshot("p1").await.unwrap();
        let clips = &snapshot.tracks[0].clips;
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].name, "A");
        assert_eq!(clips[0].media_url, "u1");
        assert_eq!(clips[0].start.to_seconds(), 0.0);
        assert_eq!(clips[0].duration.to_seconds(), 5.0);
        assert_eq!(clips[0].duration, RationalTime::new(120.0, 24.0));
    }

    #[tokio::test]
    async fn test_unknown_project_is_created_not_missing() {
        let (storage, registry) = create_registry();

        let snapshot = registry.snapshot("never-seen").await.unwrap();

        assert_eq!(snapshot.tracks.len(), 1);
        assert_eq!(snapshot.tracks[0].name, "Track 0");
        assert!(snapshot.tracks[0].clips.is_empty());
        assert!(registry.get_session("never-seen").await.is_some());
        assert!(storage.load_doc("never-seen").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_same_session_is_returned() {
        let (_, registry) = create_registry();
        let a = registry.get_or_create_session("p1").await.unwrap();
        let b = registry.get_or_create_session("p1").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.stats().await.active_sessions, 1);
    }

    #[tokio::test]
    async fn test_unsupported_action_is_rejected() {
        let (_, registry) = create_registry();

        let err = AgentAction::from_json(json!({"type": "remove_clip", "id": "x"})).unwrap_err();
        assert_eq!(err.code(), "unsupported_action");

        // Nothing was touched
        assert_eq!(registry.stats().await.active_sessions, 0);
    }

    #[tokio::test]
    async fn test_invalid_action_leaves_document_unchanged() {
        let (_, registry) = create_registry();
        let before = registry.snapshot("p1").await.unwrap();

        let mut value = add_clip_json("A", "u1", 0);
        value["start"] = json!(-3);
        let action = AgentAction::from_json(value).unwrap();

        let err = registry.apply_agent_action("p1", &action).await.unwrap_err();
        assert_eq!(err.code(), "invalid_action");
        assert_eq!(registry.snapshot("p1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_concurrent_actions_are_all_applied() {
        let (_, registry) = create_registry();
        let registry = Arc::new(registry);

        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let action =
                    AgentAction::from_json(add_clip_json(&format!("clip-{}", i), "u", i % 3))
                        .unwrap();
                registry.apply_agent_action("p1", &action).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = registry.snapshot("p1").await.unwrap();
        assert_eq!(snapshot.tracks.len(), 3);
        assert_eq!(snapshot.clip_count(), 16);
    }

    #[tokio::test]
    async fn test_evicted_session_reloads_from_storage() {
        let (_, registry) = create_registry();
        let action = AgentAction::from_json(add_clip_json("A", "u1", 1)).unwrap();
        let outcome = registry.apply_agent_action("p1", &action).await.unwrap();
        let before = registry.snapshot("p1").await.unwrap();

        let evicted = registry.evict_idle(Duration::ZERO).await;
        assert_eq!(evicted, vec!["p1".to_string()]);
        assert!(registry.get_session("p1").await.is_none());

        let after = registry.snapshot("p1").await.unwrap();
        assert_eq!(after, before);
        assert!(after.clip(outcome.clip_id).is_some());
    }

    #[tokio::test]
    async fn test_sessions_with_connections_are_not_evicted() {
        let (_, registry) = create_registry();
        let session = registry.get_or_create_session("p1").await.unwrap();
        let _connection = ClientConnection::new("alice".to_string(), "p1".to_string(), session);

        assert!(registry.evict_idle(Duration::ZERO).await.is_empty());
        assert_eq!(registry.stats().await.active_connections, 1);
    }

    #[tokio::test]
    async fn test_long_idle_timeout_keeps_sessions() {
        let (_, registry) = create_registry();
        registry.get_or_create_session("p1").await.unwrap();

        assert!(registry.evict_idle(Duration::from_secs(3600)).await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_replica_edits_merge() {
        let (_, registry) = create_registry();
        let session = registry.get_or_create_session("p1").await.unwrap();
        let base = session.full_state().await;

        let a = TimelineDoc::with_client_id(1);
        let b = TimelineDoc::with_client_id(2);
        a.apply_update(&base).unwrap();
        b.apply_update(&base).unwrap();

        let mut on_a = from_replicated(&a);
        on_a.tracks[0].clips.push(Clip::new("X", "ux", 0.0, 1.0));
        let from_a = to_replicated(&mut on_a, &a).unwrap();

        let mut on_b = from_replicated(&b);
        on_b.tracks[0].clips.push(Clip::new("Y", "uy", 0.0, 1.0));
        let from_b = to_replicated(&mut on_b, &b).unwrap();

        session.apply_update(None, &from_b).await.unwrap();
        session.apply_update(None, &from_a).await.unwrap();
        session.apply_update(None, &from_a).await.unwrap();

        a.apply_update(&from_b).unwrap();
        let server = session.snapshot().await;
        assert_eq!(server.tracks[0].clips.len(), 2);
        assert_eq!(server, from_replicated(&a));
    }

    #[tokio::test]
    async fn test_disconnect_keeps_document_for_other_peers() {
        let (_, registry) = create_registry();
        let session = registry.get_or_create_session("p1").await.unwrap();

        let mut first =
            ClientConnection::new("alice".to_string(), "p1".to_string(), session.clone());
        let mut second =
            ClientConnection::new("bob".to_string(), "p1".to_string(), session.clone());
        let initial = first.initial_sync().await;
        second.initial_sync().await;
        assert_eq!(first.state(), ConnectionState::Synced);

        let replica = TimelineDoc::new();
        replica.apply_update(&initial).unwrap();
        let mut timeline = from_replicated(&replica);
        timeline.tracks[0].clips.push(Clip::new("A", "u1", 0.0, 5.0));
        let update = to_replicated(&mut timeline, &replica).unwrap();
        first.handle_binary(&update).await;

        let first_id = first.id();
        first.close();
        drop(first);

        assert!(!session.is_present(first_id));
        assert_eq!(session.presence().len(), 1);
        assert_eq!(session.connection_count(), 1);

        let merged = TimelineDoc::new();
        merged.apply_update(&session.full_state().await).unwrap();
        assert_eq!(from_replicated(&merged).tracks[0].clips[0].name, "A");
        assert_eq!(second.state(), ConnectionState::Synced);
    }

    #[tokio::test]
    async fn test_flush_and_shutdown_save_everything() {
        let (storage, registry) = create_registry();
        registry.get_or_create_session("p1").await.unwrap();
        registry.get_or_create_session("p2").await.unwrap();

        assert_eq!(registry.flush_dirty().await, 0);
        registry.shutdown().await;

        assert_eq!(storage.list_docs().unwrap(), vec!["p1", "p2"]);
        assert_eq!(registry.stats().await.dirty_sessions, 0);
    }

    fn registry_over(storage: Arc<dyn CrdtStorage>) -> SessionRegistry {
        SessionRegistry::new(
            storage,
            SessionConfig {
                save_retry_backoff: Duration::from_millis(1),
                ..SessionConfig::default()
            },
        )
    }

    /// A store already holding project `p1` with one clip.
    async fn stored_project() -> MemoryStorage {
        let backing = MemoryStorage::new();
        let registry = registry_over(Arc::new(backing.clone()));
        let action = AgentAction::from_json(add_clip_json("A", "u1", 0)).unwrap();
        registry.apply_agent_action("p1", &action).await.unwrap();
        backing
    }

    fn stored_clip_count(storage: &MemoryStorage) -> usize {
        let state = storage.load_doc("p1").unwrap().unwrap();
        from_replicated(&TimelineDoc::from_update(&state).unwrap()).clip_count()
    }

    #[tokio::test]
    async fn test_failed_first_load_keeps_stored_project() {
        let backing = stored_project().await;
        let registry = registry_over(Arc::new(FlakyStorage::new(backing.clone()).failing_loads(1)));

        let session = registry.get_or_create_session("p1").await.unwrap();

        assert_eq!(session.snapshot().await.clip_count(), 1);
        assert_eq!(stored_clip_count(&backing), 1);
    }

    #[tokio::test]
    async fn test_unreadable_storage_fails_access_without_caching() {
        let backing = stored_project().await;
        let attempts = SessionConfig::default().save_max_attempts;
        let registry =
            registry_over(Arc::new(FlakyStorage::new(backing.clone()).failing_loads(attempts)));

        let err = registry.get_or_create_session("p1").await.unwrap_err();
        assert_eq!(err.code(), "storage");
        assert!(registry.get_session("p1").await.is_none());
        assert_eq!(stored_clip_count(&backing), 1);

        // Storage recovered: the next access loads the real project
        assert_eq!(registry.snapshot("p1").await.unwrap().clip_count(), 1);
        assert_eq!(stored_clip_count(&backing), 1);
    }

    #[tokio::test]
    async fn test_sessions_held_elsewhere_are_not_evicted() {
        let (_, registry) = create_registry();
        let held = registry.get_or_create_session("p1").await.unwrap();

        assert!(registry.evict_idle(Duration::ZERO).await.is_empty());

        let again = registry.get_or_create_session("p1").await.unwrap();
        assert!(Arc::ptr_eq(&held, &again));

        drop(held);
        drop(again);
        assert_eq!(registry.evict_idle(Duration::ZERO).await, vec!["p1".to_string()]);
    }
}
