use crate::sync::{ClientConnection, Frame, ServerMessage, SessionRegistry};
use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Shown to other peers in presence messages
    pub user_id: Option<String>,
}

/// Shared state for WebSocket handler
#[derive(Clone)]
pub struct WsState {
    pub registry: Arc<SessionRegistry>,
}

/// WebSocket upgrade handler for `/ws/collab/{project_id}`
pub async fn ws_handler(
    State(state): State<WsState>,
    Path(project_id): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let user_id = query
        .user_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("anonymous-{}", Uuid::new_v4()));

    info!("WebSocket upgrade: user={}, project={}", user_id, project_id);

    ws.on_upgrade(move |socket| handle_socket(socket, state, project_id, user_id))
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Binary(data) => Message::Binary(data.into()),
        Frame::Text(text) => Message::Text(text.into()),
    }
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, state: WsState, project_id: String, user_id: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let session = match state.registry.get_or_create_session(&project_id).await {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to open project {}: {}", project_id, e);
            let error = e.to_serializable();
            let reply = ServerMessage::Error {
                code: error.code,
                message: error.message,
            };
            let _ = ws_tx.send(Message::Text(reply.to_json().into())).await;
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };
    let mut connection = ClientConnection::new(user_id.clone(), project_id.clone(), session.clone());

    // Send initial sync (full state)
    let initial_state = connection.initial_sync().await;
    if let Err(e) = ws_tx.send(Message::Binary(initial_state.into())).await {
        error!("Failed to send initial state: {}", e);
        return;
    }

    info!(
        "WebSocket synced: user={}, project={}, connections={}",
        user_id,
        project_id,
        session.connection_count()
    );

    loop {
        tokio::select! {
            // Handle incoming messages from client
            msg = ws_rx.next() => {
                let reply = match msg {
                    Some(Ok(Message::Binary(data))) => Some(connection.handle_binary(&data).await),
                    Some(Ok(Message::Text(text))) => connection.handle_text(text.as_str()),
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            error!("Failed to send pong: {}", e);
                            break;
                        }
                        None
                    }
                    Some(Ok(Message::Pong(_))) => None,
                    Some(Ok(Message::Close(_))) => {
                        debug!("Client requested close");
                        break;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        debug!("Client stream ended");
                        break;
                    }
                };

                if let Some(reply) = reply
                    && let Err(e) = ws_tx.send(Message::Text(reply.to_json().into())).await
                {
                    error!("Failed to send reply: {}", e);
                    break;
                }
            }

            // Handle broadcast frames from other connections
            frame = connection.recv_broadcast() => {
                let Some(frame) = frame else {
                    break;
                };
                if let Err(e) = ws_tx.send(to_message(frame)).await {
                    error!("Failed to send broadcast: {}", e);
                    break;
                }
            }
        }
    }

    connection.close();
    info!(
        "WebSocket disconnected: user={}, project={}",
        user_id, project_id
    );
}
