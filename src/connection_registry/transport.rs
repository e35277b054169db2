//! Transport capability supplied by the caller for each connection

use async_trait::async_trait;
use thiserror::Error;

use super::types::Payload;

/// WebSocket close codes used by the registry.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const INTERNAL_ERROR: u16 = 1011;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("transport I/O error: {0}")]
    Io(String),
}

/// Send/close handle for one peer.
///
/// The registry owns the handle once admission succeeds and closes it on
/// removal. Implementations must tolerate `close` on an already-closed
/// handle.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Complete the transport-level handshake.
    async fn accept(&self) -> Result<(), TransportError>;

    /// Deliver one payload to the peer.
    async fn send(&self, payload: &Payload) -> Result<(), TransportError>;

    /// Best-effort close with a code and a human-readable reason.
    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError>;
}
