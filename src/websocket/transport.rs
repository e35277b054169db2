//! `Transport` over an axum WebSocket.
//!
//! The socket's write half lives in its own task fed by a bounded channel;
//! `WsTransport` is the registry-facing handle to that channel.

use std::fmt::Display;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message};
use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::connection_registry::{Payload, Transport, TransportError};

pub const CHANNEL_BUFFER_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Payload(Payload),
    Close { code: u16, reason: String },
}

#[derive(Debug, Clone)]
pub struct WsTransport {
    tx: mpsc::Sender<OutboundFrame>,
}

impl WsTransport {
    pub fn new(tx: mpsc::Sender<OutboundFrame>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn accept(&self) -> Result<(), TransportError> {
        // The HTTP upgrade has already completed by the time a socket exists
        if self.tx.is_closed() {
            return Err(TransportError::Handshake("socket writer gone".into()));
        }
        Ok(())
    }

    async fn send(&self, payload: &Payload) -> Result<(), TransportError> {
        self.tx
            .send(OutboundFrame::Payload(payload.clone()))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        self.tx
            .send(OutboundFrame::Close {
                code,
                reason: reason.to_string(),
            })
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// Drain `rx` into the socket's write half.
///
/// Ends after a close frame, on the first write error, or once every
/// `WsTransport` for this socket is dropped.
pub fn spawn_writer<S>(mut sink: S, mut rx: mpsc::Receiver<OutboundFrame>) -> JoinHandle<()>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
{
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                OutboundFrame::Payload(payload) => {
                    let text = match serde_json::to_string(&payload) {
                        Ok(t) => t,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize message");
                            continue;
                        }
                    };

                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        tracing::debug!(error = %e, "WebSocket write failed");
                        break;
                    }
                }
                OutboundFrame::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        tracing::debug!(error = %e, "WebSocket close frame failed");
                    }
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_writer_forwards_payloads_then_close() {
        let (sink, mut written) = futures::channel::mpsc::unbounded::<Message>();
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let writer = spawn_writer(sink, rx);
        let transport = WsTransport::new(tx);

        transport.accept().await.unwrap();
        transport.send(&json!({"type": "pong"})).await.unwrap();
        transport.close(1000, "normal closure").await.unwrap();
        writer.await.unwrap();

        match written.next().await {
            Some(Message::Text(text)) => assert_eq!(text.as_str(), r#"{"type":"pong"}"#),
            other => panic!("unexpected frame: {other:?}"),
        }
        match written.next().await {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(frame.code, 1000);
                assert_eq!(frame.reason.as_str(), "normal closure");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_after_writer_stops_is_closed() {
        let (sink, written) = futures::channel::mpsc::unbounded::<Message>();
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let writer = spawn_writer(sink, rx);
        let transport = WsTransport::new(tx);

        transport.close(1001, "server shutdown").await.unwrap();
        writer.await.unwrap();
        drop(written);

        assert_eq!(
            transport.send(&json!({})).await,
            Err(TransportError::Closed)
        );
        assert!(transport.accept().await.is_err());
    }

    #[tokio::test]
    async fn test_writer_stops_when_transport_dropped() {
        let (sink, _written) = futures::channel::mpsc::unbounded::<Message>();
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let writer = spawn_writer(sink, rx);

        drop(WsTransport::new(tx));

        tokio::time::timeout(std::time::Duration::from_secs(1), writer)
            .await
            .expect("writer should stop")
            .expect("writer should not panic");
    }
}
