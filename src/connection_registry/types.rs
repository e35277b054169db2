//! Connection identifiers, records and registry options

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::transport::{close_code, Transport};

/// Structured payload delivered to a connection.
pub type Payload = serde_json::Value;

/// Free-form key/value data attached to a connection.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Registry-issued connection identifier.
///
/// Built as `user:session:token` so ids stay readable in logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl Borrow<str> for ConnectionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Why a connection left the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalReason {
    /// Caller-initiated removal (peer closed, handler finished).
    Normal,
    /// A send on the transport failed or timed out.
    SendFailed,
    /// Idle longer than the configured connection timeout.
    Timeout,
    /// Registry shutdown.
    ServerShutdown,
    Custom(String),
}

impl RemovalReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Normal => "normal closure",
            Self::SendFailed => "send failed",
            Self::Timeout => "timeout",
            Self::ServerShutdown => "server shutdown",
            Self::Custom(reason) => reason,
        }
    }

    /// Close code sent to the peer along with the reason text.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::Normal | Self::Timeout | Self::Custom(_) => close_code::NORMAL,
            Self::ServerShutdown => close_code::GOING_AWAY,
            Self::SendFailed => close_code::INTERNAL_ERROR,
        }
    }

    /// Low-cardinality label for metrics.
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::SendFailed => "send_failed",
            Self::Timeout => "timeout",
            Self::ServerShutdown => "shutdown",
            Self::Custom(_) => "custom",
        }
    }
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits and timings for a registry, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryOptions {
    pub max_total_connections: usize,
    pub max_connections_per_user: usize,
    pub sweep_interval: Duration,
    pub connection_timeout: Duration,
    /// Upper bound on a single transport send before it counts as failed
    pub send_timeout: Duration,
}

impl RegistryOptions {
    /// Sweep interval actually used by the background task.
    ///
    /// Always strictly shorter than `connection_timeout`; a configured
    /// interval that is zero or not shorter falls back to half the timeout.
    pub fn effective_sweep_interval(&self) -> Duration {
        if !self.sweep_interval.is_zero() && self.sweep_interval < self.connection_timeout {
            self.sweep_interval
        } else {
            (self.connection_timeout / 2).max(Duration::from_millis(1))
        }
    }
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            max_total_connections: 100,
            max_connections_per_user: 3,
            sweep_interval: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(300),
            send_timeout: Duration::from_secs(5),
        }
    }
}

/// One admitted connection. Lives only inside the registry state.
pub(crate) struct Connection {
    pub id: ConnectionId,
    pub user_id: String,
    pub session_id: String,
    pub transport: Arc<dyn Transport>,
    pub metadata: Metadata,
    pub connected_at: DateTime<Utc>,
    pub last_activity: Instant,
}

impl Connection {
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Advance last activity, never moving it backwards.
    pub fn mark_active(&mut self, now: Instant) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }
}

/// Read-only view of a connection for inspection endpoints
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub connection_id: ConnectionId,
    pub user_id: String,
    pub session_id: String,
    pub connected_at: DateTime<Utc>,
    pub idle_seconds: u64,
    pub metadata: Metadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_borrows_as_str() {
        let mut ids = std::collections::HashSet::new();
        ids.insert(ConnectionId::from("u1:s1:0001"));

        assert!(ids.contains("u1:s1:0001"));
        assert_eq!(ConnectionId::from("a").to_string(), "a");
    }

    #[test]
    fn test_removal_reason_close_codes() {
        assert_eq!(RemovalReason::Normal.close_code(), 1000);
        assert_eq!(RemovalReason::Timeout.close_code(), 1000);
        assert_eq!(RemovalReason::ServerShutdown.close_code(), 1001);
        assert_eq!(RemovalReason::SendFailed.close_code(), 1011);
        assert_eq!(RemovalReason::Custom("kicked".into()).as_str(), "kicked");
        assert_eq!(RemovalReason::Custom("kicked".into()).metric_label(), "custom");
    }

    #[test]
    fn test_default_options() {
        let options = RegistryOptions::default();
        assert_eq!(options.max_total_connections, 100);
        assert_eq!(options.max_connections_per_user, 3);
        assert_eq!(options.sweep_interval, Duration::from_secs(60));
        assert_eq!(options.connection_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_sweep_interval_clamped_below_timeout() {
        let options = RegistryOptions {
            sweep_interval: Duration::from_secs(600),
            connection_timeout: Duration::from_secs(300),
            ..Default::default()
        };
        assert_eq!(options.effective_sweep_interval(), Duration::from_secs(150));

        let zero = RegistryOptions {
            sweep_interval: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(zero.effective_sweep_interval(), Duration::from_secs(150));

        assert_eq!(
            RegistryOptions::default().effective_sweep_interval(),
            Duration::from_secs(60)
        );
    }
}
