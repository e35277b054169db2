//! Connection inspection and forced removal.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::connection_registry::{ConnectionId, ConnectionInfo, RemovalReason};
use crate::error::{AppError, Result};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct RemoveConnectionResponse {
    pub connection_id: ConnectionId,
    pub removed: bool,
}

/// GET /api/v1/connections/{connection_id}
pub async fn get_connection(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
) -> Result<Json<ConnectionInfo>> {
    let id = ConnectionId::from(connection_id);
    state
        .registry
        .connection_info(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Connection '{}' is not active", id)))
}

/// DELETE /api/v1/connections/{connection_id}
pub async fn remove_connection(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
) -> Result<Json<RemoveConnectionResponse>> {
    let id = ConnectionId::from(connection_id);
    let removed = state
        .registry
        .remove(&id, RemovalReason::Custom("removed by operator".into()))
        .await;

    if !removed {
        return Err(AppError::NotFound(format!("Connection '{}' is not active", id)));
    }

    Ok(Json(RemoveConnectionResponse {
        connection_id: id,
        removed,
    }))
}
