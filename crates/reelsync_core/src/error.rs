use serde::Serialize;
use thiserror::Error;

/// Unified error type for reelsync operations
#[derive(Debug, Error)]
pub enum ReelSyncError {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Replication errors
    #[error("Malformed update: {0}")]
    MalformedUpdate(String),

    #[error("Failed to observe document: {0}")]
    Observe(String),

    // Agent action errors
    #[error("Unsupported action type '{0}'")]
    UnsupportedAction(String),

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Result type alias for reelsync operations
pub type Result<T> = std::result::Result<T, ReelSyncError>;

impl ReelSyncError {
    /// Stable snake_case code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            ReelSyncError::Io(_) => "io",
            ReelSyncError::Json(_) => "json",
            ReelSyncError::MalformedUpdate(_) => "malformed_update",
            ReelSyncError::Observe(_) => "observe",
            ReelSyncError::UnsupportedAction(_) => "unsupported_action",
            ReelSyncError::InvalidAction(_) => "invalid_action",
            ReelSyncError::Storage(_) => "storage",
            #[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
            ReelSyncError::Database(_) => "database",
        }
    }

    /// Whether the caller can fix the request and try again.
    ///
    /// Storage failures are the server's problem, never the caller's.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ReelSyncError::MalformedUpdate(_)
                | ReelSyncError::UnsupportedAction(_)
                | ReelSyncError::InvalidAction(_)
                | ReelSyncError::Json(_)
        )
    }

    /// Convert to a serializable representation for the wire
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }
}

/// A serializable representation of ReelSyncError for HTTP and WebSocket replies
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerializableError {
    /// Error code (e.g. `unsupported_action`)
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl From<&ReelSyncError> for SerializableError {
    fn from(err: &ReelSyncError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<ReelSyncError> for SerializableError {
    fn from(err: ReelSyncError) -> Self {
        SerializableError::from(&err)
    }
}
