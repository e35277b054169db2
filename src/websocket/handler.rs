use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::Response,
};
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::auth::Claims;
use crate::connection_registry::{ConnectionId, Metadata, RemovalReason, Transport};
use crate::error::AppError;
use crate::server::AppState;

use super::message::{reply_for, ClientMessage, ServerMessage};
use super::transport::{spawn_writer, WsTransport, CHANNEL_BUFFER_SIZE};

/// How long to wait for queued frames to flush after the read side ends
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
    pub session_id: Option<String>,
}

/// WebSocket upgrade handler
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query, headers),
    fields(has_query_token = query.token.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let token = extract_token(&query, &headers)
        .ok_or_else(|| AppError::Auth("Missing authentication token".into()))?;

    let claims = state.jwt_validator.validate(&token).map_err(|e| {
        tracing::warn!(error = %e, "JWT validation failed");
        e
    })?;

    let session_id = resolve_session_id(query.session_id.as_deref(), &claims);

    // Cheap pre-check; admission re-checks atomically after the upgrade
    state.registry.can_admit(claims.user_id())?;

    tracing::info!(user_id = %claims.sub, session_id = %session_id, "WebSocket upgrade requested");

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, claims, session_id)))
}

/// Extract token from query parameter or Authorization header
fn extract_token(query: &WsQuery, headers: &HeaderMap) -> Option<String> {
    // First try query parameter
    if let Some(ref token) = query.token {
        return Some(token.clone());
    }

    // Then try Authorization header
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Query parameter first, then the token's claim, else a fresh id
fn resolve_session_id(requested: Option<&str>, claims: &Claims) -> String {
    requested
        .filter(|s| !s.is_empty())
        .or_else(|| claims.session_id())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state, claims),
    fields(user_id = %claims.sub)
)]
async fn handle_socket(socket: WebSocket, state: AppState, claims: Claims, session_id: String) {
    let user_id = claims.sub.clone();
    let connection_start = std::time::Instant::now();

    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let mut writer = spawn_writer(ws_sender, rx);
    let transport: Arc<dyn Transport> = Arc::new(WsTransport::new(tx));

    let metadata: Metadata = claims.extra.into_iter().collect();

    let connection_id = match state
        .registry
        .admit(transport, &user_id, &session_id, Some(metadata))
        .await
    {
        Ok(id) => id,
        Err(e) => {
            // The registry has already logged and closed the socket
            tracing::debug!(user_id = %user_id, error = %e, "Admission failed");
            let _ = tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await;
            return;
        }
    };

    let ack = ServerMessage::connection_ack(&connection_id, &session_id);
    if let Err(e) = state.registry.send(&connection_id, &ack.to_payload()).await {
        tracing::warn!(connection_id = %connection_id, error = %e, "Failed to send connection ack");
        let _ = tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await;
        return;
    }

    let mut writer_done = false;
    loop {
        tokio::select! {
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(msg)) => {
                    if !process_message(msg, &state, &connection_id).await {
                        break;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(connection_id = %connection_id, error = %e, "WebSocket receive error");
                    break;
                }
                None => break,
            },
            // Removed elsewhere (sweep, admin, failed send): the writer has closed the socket
            _ = &mut writer => {
                writer_done = true;
                break;
            }
        }
    }

    state
        .registry
        .remove(&connection_id, RemovalReason::Normal)
        .await;

    if !writer_done {
        let _ = tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await;
    }

    tracing::info!(
        connection_id = %connection_id,
        user_id = %user_id,
        duration_secs = connection_start.elapsed().as_secs_f64(),
        "WebSocket connection closed"
    );
}

/// Process a received WebSocket message
/// Returns false if the connection should be closed
async fn process_message(msg: Message, state: &AppState, connection_id: &ConnectionId) -> bool {
    if !state.registry.touch(connection_id) {
        return false;
    }

    let reply = match msg {
        Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
            Ok(client_msg) => {
                let reply = reply_for(&client_msg);
                if reply.is_none() {
                    tracing::debug!(connection_id = %connection_id, "Ignoring application message");
                }
                reply
            }
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "Failed to parse client message");
                Some(ServerMessage::error("INVALID_MESSAGE", e.to_string()))
            }
        },
        Message::Binary(_) => Some(ServerMessage::error(
            "UNSUPPORTED_FORMAT",
            "Binary messages are not supported",
        )),
        // Axum answers pings itself; both directions still count as activity
        Message::Ping(_) | Message::Pong(_) => None,
        Message::Close(_) => {
            tracing::debug!(connection_id = %connection_id, "Received close frame");
            return false;
        }
    };

    match reply {
        Some(reply) => state
            .registry
            .send(connection_id, &reply.to_payload())
            .await
            .is_ok(),
        None => true,
    }
}
