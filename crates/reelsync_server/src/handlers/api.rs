use crate::sync::SessionRegistry;
use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use reelsync_core::{AgentAction, ClipId, ReelSyncError};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<SessionRegistry>,
}

/// Server status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub active_connections: usize,
    pub active_sessions: usize,
    pub unsaved_sessions: usize,
}

/// Result of an applied agent action
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub status: String,
    pub project_id: String,
    pub clip_id: ClipId,
    pub track: usize,
}

/// Create API routes
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/projects/{project_id}/actions", post(post_action))
        .route("/projects/{project_id}/timeline", get(get_timeline))
        .with_state(state)
}

fn error_response(err: &ReelSyncError) -> Response {
    let status = if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(err.to_serializable())).into_response()
}

/// GET /api/status - Get server status
async fn get_status(State(state): State<ApiState>) -> impl IntoResponse {
    let stats = state.registry.stats().await;

    Json(StatusResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_connections: stats.active_connections,
        active_sessions: stats.active_sessions,
        unsaved_sessions: stats.dirty_sessions,
    })
}

/// POST /api/projects/{project_id}/actions - Apply an agent action
async fn post_action(
    State(state): State<ApiState>,
    Path(project_id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let action = match AgentAction::from_json(body) {
        Ok(action) => action,
        Err(e) => {
            warn!("Rejected action for project {}: {}", project_id, e);
            return error_response(&e);
        }
    };

    match state.registry.apply_agent_action(&project_id, &action).await {
        Ok(outcome) => Json(ActionResponse {
            status: "success".to_string(),
            project_id,
            clip_id: outcome.clip_id,
            track: outcome.track,
        })
        .into_response(),
        Err(e) => {
            warn!("Action {} on project {} failed: {}", action.tag(), project_id, e);
            error_response(&e)
        }
    }
}

/// GET /api/projects/{project_id}/timeline - Domain snapshot of a project
async fn get_timeline(State(state): State<ApiState>, Path(project_id): Path<String>) -> Response {
    match state.registry.snapshot(&project_id).await {
        Ok(timeline) => Json(timeline).into_response(),
        Err(e) => {
            warn!("Snapshot of project {} failed: {}", project_id, e);
            error_response(&e)
        }
    }
}
