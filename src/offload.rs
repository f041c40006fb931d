//! The "by value vs. by reference" payload offload protocol.
//!
//! Transports with a message-size ceiling cannot carry arbitrary payloads
//! in-band. [`OffloadCodec`] sends small payloads directly ("by value")
//! and parks oversized ones in a [`BulkStore`], sending a reference
//! envelope instead. The representation is declared by an explicit
//! discriminator tag on the transport message — the receiver trusts only
//! the tag, never the observed size, so sender and receiver need not agree
//! on a ceiling.

use crate::channel::transport::TransportMessage;
use crate::error::{PipelineError, Result};
use crate::store::BulkStore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message property carrying the discriminator tag, out-of-band of the body.
pub const PASSED_BY_PROPERTY: &str = "PassedBy";

/// Wire representation of a channel message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassedBy {
    /// The body is the payload itself.
    Value,

    /// The body is a JSON [`OffloadEnvelope`] pointing at the payload.
    Reference,
}

impl PassedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            PassedBy::Value => "Value",
            PassedBy::Reference => "Reference",
        }
    }

    /// Parse a tag value. Unrecognized strings return `None`; the caller
    /// decides how loudly to complain.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Value" => Some(PassedBy::Value),
            "Reference" => Some(PassedBy::Reference),
            _ => None,
        }
    }
}

/// Reference record substituted for an oversized payload.
///
/// Field names are part of the wire format and must stay stable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OffloadEnvelope {
    /// Bulk store container holding the payload.
    pub container: String,

    /// Object key within the container.
    pub blob: String,

    /// Original MIME type of the offloaded payload.
    #[serde(rename = "contentType")]
    pub content_type: String,
}

/// Per-channel encoder/decoder for the offload protocol.
#[derive(Debug, Clone)]
pub struct OffloadCodec {
    channel: String,
    ceiling: usize,
    container: String,
}

impl OffloadCodec {
    pub fn new(channel: impl Into<String>, ceiling: usize, container: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ceiling,
            container: container.into(),
        }
    }

    /// The in-band size ceiling this codec encodes against.
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Encode a payload for sending.
    ///
    /// Payloads at or under the ceiling go out by value; larger ones are
    /// written to the store under a fresh time-ordered key and replaced by
    /// a reference envelope.
    pub async fn encode(
        &self,
        store: &dyn BulkStore,
        payload: Vec<u8>,
        content_type: &str,
    ) -> Result<TransportMessage> {
        if payload.len() <= self.ceiling {
            let mut message = TransportMessage::new(payload, content_type);
            message.set_property(PASSED_BY_PROPERTY, PassedBy::Value.as_str());
            return Ok(message);
        }

        // UUID v7 keys are time-ordered, so concurrent senders never collide.
        let blob = format!("{}-{}", self.channel, Uuid::now_v7());
        tracing::debug!(
            channel = %self.channel,
            size = payload.len(),
            ceiling = self.ceiling,
            blob = %blob,
            "payload over ceiling, offloading to bulk store"
        );
        store.put(&self.container, &blob, payload).await?;

        let envelope = OffloadEnvelope {
            container: self.container.clone(),
            blob,
            content_type: content_type.to_string(),
        };
        let body = serde_json::to_vec(&envelope)?;
        let mut message = TransportMessage::new(body, "application/json");
        message.set_property(PASSED_BY_PROPERTY, PassedBy::Reference.as_str());
        Ok(message)
    }

    /// Decode a received message into `(payload, content_type)`.
    ///
    /// Only the discriminator tag selects the interpretation. A missing or
    /// unrecognized tag is an [`PipelineError::UnknownMessageTag`] — the
    /// body is never guessed at.
    pub async fn decode(
        &self,
        store: &dyn BulkStore,
        message: TransportMessage,
    ) -> Result<(Vec<u8>, String)> {
        let tag = message
            .property(PASSED_BY_PROPERTY)
            .and_then(PassedBy::parse)
            .ok_or_else(|| PipelineError::UnknownMessageTag {
                channel: self.channel.clone(),
                message: format!(
                    "missing or unrecognized '{}' property",
                    PASSED_BY_PROPERTY
                ),
            })?;

        match tag {
            PassedBy::Value => Ok((message.body, message.content_type)),
            PassedBy::Reference => {
                let envelope: OffloadEnvelope = serde_json::from_slice(&message.body)?;
                let payload = store.get(&envelope.container, &envelope.blob).await?;
                Ok((payload, envelope.content_type))
            }
        }
    }
}
