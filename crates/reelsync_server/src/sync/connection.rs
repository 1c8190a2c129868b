use super::protocol::{ClientMessage, ServerMessage};
use super::session::{ConnectionId, Frame, ProjectSession, SessionEvent};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Subscribed to the session, initial state not sent yet
    Connecting,
    /// Initial state sent; updates flow both ways
    Synced,
    Closed,
}

/// Represents a connected client
pub struct ClientConnection {
    id: ConnectionId,
    pub user_id: String,
    pub project_id: String,
    session: Arc<ProjectSession>,
    broadcast_rx: broadcast::Receiver<SessionEvent>,
    state: ConnectionState,
    /// Set once frames were missed, cleared when the full state is handed out
    resync_pending: bool,
}

impl ClientConnection {
    /// Create a new client connection
    pub fn new(user_id: String, project_id: String, session: Arc<ProjectSession>) -> Self {
        let broadcast_rx = session.subscribe();

        Self {
            id: ConnectionId::new(),
            user_id,
            project_id,
            session,
            broadcast_rx,
            state: ConnectionState::Connecting,
            resync_pending: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Register presence and get the initial sync frame (full state).
    ///
    /// The connection is already subscribed, so any update merged after this
    /// state was encoded is still delivered through [`recv_broadcast`](Self::recv_broadcast).
    pub async fn initial_sync(&mut self) -> Vec<u8> {
        if self.state == ConnectionState::Connecting {
            self.session.join(self.id, &self.user_id);
            self.state = ConnectionState::Synced;
        }
        self.session.full_state().await
    }

    /// Handle a binary frame: merge it as an update.
    ///
    /// Returns the acknowledgement, or an error message for this connection
    /// only if the bytes were rejected.
    pub async fn handle_binary(&self, data: &[u8]) -> ServerMessage {
        match self.session.apply_update(Some(self.id), data).await {
            Ok(bytes_processed) => ServerMessage::Ack { bytes_processed },
            Err(e) => {
                warn!(
                    "Rejected update from user={} project={}: {}",
                    self.user_id, self.project_id, e
                );
                let error = e.to_serializable();
                ServerMessage::Error {
                    code: error.code,
                    message: error.message,
                }
            }
        }
    }

    /// Handle a text frame. Returns the reply to send back, if any.
    pub fn handle_text(&self, text: &str) -> Option<ServerMessage> {
        match ClientMessage::parse(text) {
            Some(ClientMessage::Awareness) => {
                self.session
                    .broadcast(Some(self.id), Frame::Text(text.to_string()));
                None
            }
            Some(ClientMessage::Ping) => Some(ServerMessage::Pong),
            Some(ClientMessage::Unknown) | None => {
                debug!(
                    "Ignoring text frame from user={} project={}",
                    self.user_id, self.project_id
                );
                None
            }
        }
    }

    /// Receive the next frame from other connections.
    ///
    /// Skips frames this connection caused. A connection that fell behind the
    /// broadcast buffer gets the full state instead of the frames it missed.
    ///
    /// Cancel safe: if the future is dropped while the full state is being
    /// read, the next call sends it.
    pub async fn recv_broadcast(&mut self) -> Option<Frame> {
        loop {
            if self.resync_pending {
                let state = self.session.full_state().await;
                self.resync_pending = false;
                return Some(Frame::Binary(state));
            }

            match self.broadcast_rx.recv().await {
                Ok(event) if event.origin == Some(self.id) => continue,
                Ok(event) => return Some(event.frame),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        "Client {} lagged {} messages, sending full state",
                        self.user_id, n
                    );
                    self.resync_pending = true;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Remove this connection from presence. The document is untouched.
    pub fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            self.session.leave(self.id);
            self.state = ConnectionState::Closed;
        }
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.close();
        self.session.unsubscribe();
        debug!(
            "Client disconnected: user={}, project={}",
            self.user_id, self.project_id
        );
    }
}
