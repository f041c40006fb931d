//! Transport seam between a channel and its backing system.
//!
//! A [`Transport`] moves [`TransportMessage`]s to and from one external
//! endpoint (message bus, webhook, in-process loopback). Channels own the
//! lifecycle: they connect, send, subscribe, and disconnect; transports
//! never drive themselves.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// One message on the wire: a body plus out-of-band metadata.
///
/// Properties travel beside the body (application headers on a bus,
/// HTTP headers on a webhook) — the offload discriminator tag lives here,
/// never inside the body.
#[derive(Debug, Clone)]
pub struct TransportMessage {
    /// Raw message body.
    pub body: Vec<u8>,

    /// MIME type of the body as transmitted.
    pub content_type: String,

    /// Out-of-band application properties.
    pub properties: HashMap<String, String>,
}

impl TransportMessage {
    pub fn new(body: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            content_type: content_type.into(),
            properties: HashMap::new(),
        }
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(|v| v.as_str())
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }
}

/// Connection-oriented message transport.
///
/// Implementations are driven under the owning channel's lock, so they can
/// assume `connect`/`disconnect`/`send` are never called concurrently on
/// one instance.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Stable transport type name for logging.
    fn name(&self) -> &'static str;

    /// Establish the connection. Called once per open.
    async fn connect(&mut self) -> Result<()>;

    /// Tear the connection down. Must tolerate being called when already
    /// disconnected.
    async fn disconnect(&mut self) -> Result<()>;

    /// Send one message. Requires a prior successful `connect`.
    async fn send(&mut self, message: TransportMessage) -> Result<()>;

    /// Start delivering inbound messages.
    ///
    /// Returns the receiving end of the inbound queue; the transport stops
    /// delivering when the receiver is dropped. Send-only transports
    /// return an error.
    async fn subscribe(&mut self) -> Result<mpsc::Receiver<TransportMessage>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_properties() {
        let mut message = TransportMessage::new(b"body".to_vec(), "text/plain");
        assert!(message.property("PassedBy").is_none());

        message.set_property("PassedBy", "Value");
        assert_eq!(message.property("PassedBy"), Some("Value"));

        message.set_property("PassedBy", "Reference");
        assert_eq!(message.property("PassedBy"), Some("Reference"));
    }
}
