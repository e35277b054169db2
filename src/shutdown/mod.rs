//! Graceful shutdown for the gateway.
//!
//! 1. Notify every connected client that the server is going away
//! 2. Shut the registry down, which stops the idle sweep and closes every
//!    remaining connection

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::connection_registry::{ConnectionRegistry, ShutdownReport};
use crate::websocket::ServerMessage;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for clients to be notified (default: 5 seconds)
    pub client_notification_timeout: Duration,
    /// Suggested reconnect delay to send to clients (default: 5 seconds)
    pub reconnect_after_seconds: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            client_notification_timeout: Duration::from_secs(5),
            reconnect_after_seconds: 5,
        }
    }
}

/// Handles graceful shutdown of the gateway
pub struct GracefulShutdown {
    registry: Arc<ConnectionRegistry>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self::with_config(registry, ShutdownConfig::default())
    }

    pub fn with_config(registry: Arc<ConnectionRegistry>, config: ShutdownConfig) -> Self {
        Self { registry, config }
    }

    /// Execute graceful shutdown sequence
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(total_connections = self.registry.stats().total_active)
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = std::time::Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Notifying clients");
        result.clients_notified = self.notify_clients(reason).await;

        tracing::info!("Phase 2: Stopping idle sweep and closing remaining connections");
        result.registry = self.registry.shutdown().await;

        result.duration = start.elapsed();

        tracing::info!(
            clients_notified = result.clients_notified,
            connections_closed = result.registry.connections_closed,
            sweep_stopped = result.registry.sweep_stopped,
            duration_ms = result.duration.as_millis() as u64,
            "Graceful shutdown completed"
        );

        result
    }

    /// Broadcast a shutdown notice; bounded by the notification timeout
    async fn notify_clients(&self, reason: &str) -> usize {
        if self.registry.stats().total_active == 0 {
            return 0;
        }

        let message = ServerMessage::shutdown(reason, Some(self.config.reconnect_after_seconds));
        let payload = message.to_payload();

        match timeout(
            self.config.client_notification_timeout,
            self.registry.broadcast(&payload, None),
        )
        .await
        {
            Ok(report) => {
                tracing::info!(
                    notified = report.delivered,
                    total = report.attempted,
                    "Shutdown notifications sent"
                );
                report.delivered
            }
            Err(_) => {
                tracing::warn!("Timeout sending shutdown notifications");
                0
            }
        }
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Number of clients that were notified
    pub clients_notified: usize,
    /// What the registry tore down
    pub registry: ShutdownReport,
    /// Total time taken for shutdown
    pub duration: Duration,
}
