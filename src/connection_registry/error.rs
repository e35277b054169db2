//! Registry outcomes that callers must handle

use thiserror::Error;

use super::transport::TransportError;
use super::types::ConnectionId;

/// Capacity rejection. Expected, and surfaced to the peer as a close reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("server at capacity ({max} connections)")]
    ServerAtCapacity { max: usize },

    #[error("per-user limit reached ({max} connections)")]
    UserLimitReached { user_id: String, max: usize },
}

impl RejectReason {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::ServerAtCapacity { .. } => "SERVER_AT_CAPACITY",
            Self::UserLimitReached { .. } => "USER_LIMIT_REACHED",
        }
    }

    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::ServerAtCapacity { .. } => "capacity",
            Self::UserLimitReached { .. } => "user_limit",
        }
    }
}

#[derive(Debug, Error)]
pub enum AdmitError {
    #[error("connection rejected: {0}")]
    Rejected(#[from] RejectReason),

    #[error("transport handshake failed: {0}")]
    Transport(#[source] TransportError),

    #[error("no unique connection id after {attempts} attempts")]
    IdExhausted { attempts: usize },
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("send to {id} failed: {source}")]
    Transport {
        id: ConnectionId,
        #[source]
        source: TransportError,
    },

    #[error("send to {id} timed out after {timeout_ms}ms")]
    Timeout { id: ConnectionId, timeout_ms: u64 },
}

impl SendError {
    /// True when the connection was removed as a consequence of this error.
    pub fn removed_connection(&self) -> bool {
        !matches!(self, Self::UnknownConnection(_))
    }
}
