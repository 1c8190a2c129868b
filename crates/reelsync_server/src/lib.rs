//! ReelSync Server
//!
//! A real-time collaboration server for ReelSync video timelines.
//!
//! ## Features
//!
//! - **Real-time sync**: WebSocket relay of replicated timeline updates, one
//!   session per project
//! - **Agent actions**: HTTP endpoint that turns tagged JSON edits into
//!   replicated updates seen live by every connected editor
//! - **Presence**: join/leave notifications and awareness relay
//! - **Persistent storage**: SQLite or in-memory storage for document state
//!
//! ## Environment Variables
//!
//! - `HOST`: Server host (default: 0.0.0.0)
//! - `PORT`: Server port (default: 3030)
//! - `DATABASE_PATH`: Path to SQLite database (default: unset, in-memory)
//! - `CORS_ORIGINS`: Comma-separated list of allowed origins (default: `*`)
//! - `SAVE_MAX_ATTEMPTS`: Attempts per document load or save (default: 3)
//! - `SAVE_RETRY_BACKOFF_MS`: Delay before the first save retry (default: 100)
//! - `SESSION_IDLE_TIMEOUT_SECS`: Idle time before an unused session is evicted (default: 900)
//! - `MAINTENANCE_INTERVAL_SECS`: Interval of the flush/evict task (default: 60)
//! - `BROADCAST_CAPACITY`: Per-project broadcast buffer (default: 1024)

pub mod config;
pub mod handlers;
pub mod sync;

pub use config::Config;

use axum::{Router, routing::get};
use handlers::{api::ApiState, api_routes, ws::WsState, ws_handler};
use std::sync::Arc;
use sync::SessionRegistry;
use tower_http::trace::TraceLayer;

/// Build the application router around a session registry.
///
/// CORS is left to the caller, since it depends on deployment config.
pub fn router(registry: Arc<SessionRegistry>) -> Router {
    let ws_state = WsState {
        registry: registry.clone(),
    };
    let api_state = ApiState { registry };

    Router::new()
        // Health check
        .route("/", get(|| async { "ReelSync Server" }))
        .route("/health", get(|| async { "OK" }))
        // WebSocket collaboration endpoint
        .route(
            "/ws/collab/{project_id}",
            get(ws_handler).with_state(ws_state),
        )
        // API routes
        .nest("/api", api_routes(api_state))
        .layer(TraceLayer::new_for_http())
}
