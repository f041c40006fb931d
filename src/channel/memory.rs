//! In-memory loopback transport.
//!
//! [`InMemoryTransport`] delivers everything sent on it straight back to
//! its own subscriber and keeps a log of sent messages, which makes it the
//! workhorse for deterministic tests and single-process deployments — the
//! same role the teacher backends' mock plays for LLM calls.

use super::transport::{Transport, TransportMessage};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Buffered messages held while no subscriber is draining.
const LOOPBACK_CAPACITY: usize = 1024;

/// Loopback transport: sends are delivered to the local subscriber.
pub struct InMemoryTransport {
    connected: bool,
    inbound_tx: mpsc::Sender<TransportMessage>,
    inbound_rx: Option<mpsc::Receiver<TransportMessage>>,
    sent: Arc<Mutex<Vec<TransportMessage>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(LOOPBACK_CAPACITY);
        Self {
            connected: false,
            inbound_tx,
            inbound_rx: Some(inbound_rx),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handle for injecting inbound messages from outside the channel,
    /// as if a remote peer had sent them.
    pub fn injector(&self) -> mpsc::Sender<TransportMessage> {
        self.inbound_tx.clone()
    }

    /// Shared view of every message sent through this transport.
    pub fn sent_log(&self) -> Arc<Mutex<Vec<TransportMessage>>> {
        Arc::clone(&self.sent)
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    async fn send(&mut self, message: TransportMessage) -> Result<()> {
        if !self.connected {
            return Err(PipelineError::InvalidChannelState {
                channel: "in-memory".to_string(),
                state: "disconnected".to_string(),
                operation: "send".to_string(),
            });
        }
        self.sent.lock().unwrap().push(message.clone());
        self.inbound_tx
            .send(message)
            .await
            .map_err(|_| PipelineError::ChannelFailed {
                channel: "in-memory".to_string(),
                message: "loopback subscriber dropped".to_string(),
            })
    }

    async fn subscribe(&mut self) -> Result<mpsc::Receiver<TransportMessage>> {
        self.inbound_rx
            .take()
            .ok_or_else(|| PipelineError::ChannelFailed {
                channel: "in-memory".to_string(),
                message: "already subscribed".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_requires_connect() {
        let mut transport = InMemoryTransport::new();
        let err = transport
            .send(TransportMessage::new(b"x".to_vec(), "text/plain"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidChannelState { .. }));
    }

    #[tokio::test]
    async fn test_loopback_delivery() {
        let mut transport = InMemoryTransport::new();
        transport.connect().await.unwrap();
        let mut rx = transport.subscribe().await.unwrap();

        transport
            .send(TransportMessage::new(b"hello".to_vec(), "text/plain"))
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.body, b"hello");
        assert_eq!(transport.sent_log().lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_messages_buffer_until_subscribe() {
        let mut transport = InMemoryTransport::new();
        transport.connect().await.unwrap();
        transport
            .send(TransportMessage::new(b"early".to_vec(), "text/plain"))
            .await
            .unwrap();

        let mut rx = transport.subscribe().await.unwrap();
        assert_eq!(rx.recv().await.unwrap().body, b"early");
    }

    #[tokio::test]
    async fn test_injector_bypasses_send() {
        let mut transport = InMemoryTransport::new();
        let injector = transport.injector();
        let mut rx = transport.subscribe().await.unwrap();

        injector
            .send(TransportMessage::new(b"from-peer".to_vec(), "text/plain"))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().body, b"from-peer");
        assert!(transport.sent_log().lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_subscribe_fails() {
        let mut transport = InMemoryTransport::new();
        let _rx = transport.subscribe().await.unwrap();
        assert!(transport.subscribe().await.is_err());
    }
}
