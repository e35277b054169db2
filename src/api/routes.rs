use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::connection::{get_connection, remove_connection};
use super::health::{health, stats};
use super::messages::{broadcast, send_to_session, send_to_user};
use super::metrics::prometheus_metrics;

pub fn public_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
}

/// Mounted under `/api/v1`
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // Connection inspection and forced removal
        .route(
            "/connections/{connection_id}",
            get(get_connection).delete(remove_connection),
        )
        // Directed delivery
        .route("/users/{user_id}/messages", post(send_to_user))
        .route("/sessions/{session_id}/messages", post(send_to_session))
        // Broadcast
        .route("/broadcast", post(broadcast))
}
