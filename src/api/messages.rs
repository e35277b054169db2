//! Directed delivery and broadcast endpoints.

use std::collections::HashSet;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::connection_registry::{BroadcastReport, ConnectionId, Payload};
use crate::error::{AppError, Result};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub payload: Payload,
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub payload: Payload,
    #[serde(default)]
    pub exclude: Vec<ConnectionId>,
}

#[derive(Debug, Serialize)]
pub struct DeliveryResponse {
    pub delivered: usize,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: Vec<ConnectionId>,
}

impl From<BroadcastReport> for BroadcastResponse {
    fn from(report: BroadcastReport) -> Self {
        Self {
            attempted: report.attempted,
            delivered: report.delivered,
            failed: report.failed,
        }
    }
}

fn require_payload(payload: &Payload) -> Result<()> {
    if payload.is_null() {
        return Err(AppError::Validation("payload must not be null".into()));
    }
    Ok(())
}

/// POST /api/v1/users/{user_id}/messages
pub async fn send_to_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<SendRequest>,
) -> Result<Json<DeliveryResponse>> {
    require_payload(&request.payload)?;
    let delivered = state.registry.send_to_user(&user_id, &request.payload).await;
    Ok(Json(DeliveryResponse { delivered }))
}

/// POST /api/v1/sessions/{session_id}/messages
pub async fn send_to_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<SendRequest>,
) -> Result<Json<DeliveryResponse>> {
    require_payload(&request.payload)?;
    let delivered = state
        .registry
        .send_to_session(&session_id, &request.payload)
        .await;
    Ok(Json(DeliveryResponse { delivered }))
}

/// POST /api/v1/broadcast
pub async fn broadcast(
    State(state): State<AppState>,
    Json(request): Json<BroadcastRequest>,
) -> Result<Json<BroadcastResponse>> {
    require_payload(&request.payload)?;

    let exclude: HashSet<ConnectionId> = request.exclude.into_iter().collect();
    let exclude = (!exclude.is_empty()).then_some(&exclude);

    let report = state.registry.broadcast(&request.payload, exclude).await;
    Ok(Json(report.into()))
}
