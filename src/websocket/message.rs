use serde::{Deserialize, Serialize};

use crate::connection_registry::{ConnectionId, Payload};

/// Messages sent from client to server.
///
/// Only the gateway-level control messages are recognised; anything else is
/// an application message and is not interpreted here.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    Pong,
    Heartbeat,
    HeartbeatAck,
    Connection,
    #[serde(other)]
    Other,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionAck {
        message: String,
        connection_id: ConnectionId,
        session_id: String,
        timestamp: i64,
    },
    Pong {
        timestamp: i64,
    },
    Ack {
        message: String,
        timestamp: i64,
    },
    Error {
        code: String,
        message: String,
    },
    Shutdown {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reconnect_after_seconds: Option<u64>,
    },
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl ServerMessage {
    pub fn connection_ack(connection_id: &ConnectionId, session_id: &str) -> Self {
        Self::ConnectionAck {
            message: "Connected successfully".to_string(),
            connection_id: connection_id.clone(),
            session_id: session_id.to_string(),
            timestamp: now_millis(),
        }
    }

    pub fn pong() -> Self {
        Self::Pong {
            timestamp: now_millis(),
        }
    }

    pub fn ack(message: impl Into<String>) -> Self {
        Self::Ack {
            message: message.into(),
            timestamp: now_millis(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn shutdown(reason: impl Into<String>, reconnect_after_seconds: Option<u64>) -> Self {
        Self::Shutdown {
            reason: reason.into(),
            reconnect_after_seconds,
        }
    }

    /// Convert to the payload type the registry delivers
    pub fn to_payload(&self) -> Payload {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Reply owed for a control message, if any
pub fn reply_for(msg: &ClientMessage) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Ping => Some(ServerMessage::pong()),
        ClientMessage::Pong
        | ClientMessage::Heartbeat
        | ClientMessage::HeartbeatAck
        | ClientMessage::Connection => Some(ServerMessage::ack("System message received")),
        ClientMessage::Other => None,
    }
}
