use serde::{Deserialize, Serialize};

/// Control messages a client sends as text frames
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ephemeral cursor/selection state, relayed verbatim to other peers
    Awareness,
    Ping,
    /// Any tag this server does not know; ignored
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Parse a text frame. Returns `None` for anything that is not a tagged JSON object.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// Control messages the server sends as text frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A binary update was merged
    Ack {
        bytes_processed: usize,
    },
    Pong,
    /// A request from this connection was rejected; the connection stays open
    Error {
        code: String,
        message: String,
    },
    PeerJoined {
        user_id: String,
        peer_count: usize,
    },
    PeerLeft {
        user_id: String,
        peer_count: usize,
    },
}

impl ServerMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
