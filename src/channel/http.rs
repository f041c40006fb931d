//! Send-only HTTP push transport.
//!
//! [`HttpTransport`] POSTs each message body to a fixed endpoint. The
//! body's MIME type rides in `Content-Type`; every message property is
//! mapped to an `X-Relay-*` request header, which keeps the offload
//! discriminator tag out-of-band exactly as a bus transport would.

use super::transport::{Transport, TransportMessage};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio::sync::mpsc;

/// Prefix for message properties carried as HTTP headers.
const PROPERTY_HEADER_PREFIX: &str = "X-Relay-";

/// HTTP push transport. Receiving is not supported.
pub struct HttpTransport {
    endpoint: String,
    timeout: Duration,
    client: Option<Client>,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(30),
            client: None,
        }
    }

    /// Set the per-request timeout. Default: 30 seconds.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn failed(&self, message: impl Into<String>) -> PipelineError {
        PipelineError::ChannelFailed {
            channel: format!("http:{}", self.endpoint),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn connect(&mut self) -> Result<()> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(PipelineError::Request)?;
        self.client = Some(client);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.client = None;
        Ok(())
    }

    async fn send(&mut self, message: TransportMessage) -> Result<()> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| PipelineError::InvalidChannelState {
                channel: format!("http:{}", self.endpoint),
                state: "disconnected".to_string(),
                operation: "send".to_string(),
            })?;

        let mut request = client
            .post(&self.endpoint)
            .header("Content-Type", message.content_type.as_str())
            .body(message.body);
        for (key, value) in &message.properties {
            request = request.header(
                format!("{}{}", PROPERTY_HEADER_PREFIX, key),
                value.as_str(),
            );
        }

        let response = request.send().await.map_err(PipelineError::Request)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(self.failed(format!("endpoint returned {}: {}", status, body)));
        }
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<mpsc::Receiver<TransportMessage>> {
        Err(self.failed("http transport is send-only"))
    }
}
