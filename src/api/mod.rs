//! API layer - HTTP endpoint handlers organized by domain.

mod connection;
mod health;
mod messages;
mod metrics;
mod routes;

pub use connection::{get_connection, remove_connection, RemoveConnectionResponse};
pub use health::{health, stats, HealthResponse};
pub use messages::{
    broadcast, send_to_session, send_to_user, BroadcastRequest, BroadcastResponse,
    DeliveryResponse, SendRequest,
};
pub use metrics::prometheus_metrics;
pub use routes::{admin_routes, public_routes};
