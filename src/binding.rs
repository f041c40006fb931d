//! The binding: the single downstream call that produces the canonical
//! response content.
//!
//! At most one binding runs per pipeline execution, after the input side
//! and before the output side. A binding failure is always fatal — a
//! partial downstream result is never trusted.

use crate::context::Context;
use crate::error::PipelineError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Error raised by a binding. Always treated as fatal by the orchestrator.
#[derive(Debug, Clone)]
pub struct BindingError {
    /// Name of the binding that failed.
    pub binding: String,

    /// Human-readable description.
    pub message: String,

    /// Status to record on the context. `None` defaults to 500.
    pub status_code: Option<u16>,
}

impl BindingError {
    pub fn new(binding: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            binding: binding.into(),
            message: message.into(),
            status_code: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }
}

impl From<BindingError> for PipelineError {
    fn from(err: BindingError) -> Self {
        PipelineError::BindingFailed {
            binding: err.binding,
            message: err.message,
        }
    }
}

/// Single downstream invocation step.
#[async_trait]
pub trait Binding: Send + Sync {
    /// Instance name (for logging, events, and the execution trail).
    fn name(&self) -> &str;

    /// Produce the canonical response content on the context.
    async fn execute(&self, ctx: &mut Context) -> Result<(), BindingError>;
}

/// A [`Binding`] backed by a closure, for tests and inline deployments.
pub struct FnBinding<F> {
    name: String,
    func: F,
}

impl<F> FnBinding<F>
where
    F: Fn(&mut Context) -> Result<(), BindingError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> Binding for FnBinding<F>
where
    F: Fn(&mut Context) -> Result<(), BindingError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &mut Context) -> Result<(), BindingError> {
        (self.func)(ctx)
    }
}

/// Forwards the request to a downstream HTTP service and adopts its
/// response as the context's content and status.
///
/// The request-scoped header directives on the context are materialized
/// onto the outgoing call; the downstream status is recorded even when it
/// is an error status — forwarding a 404 is a successful binding run, only
/// transport-level failures are binding errors.
pub struct HttpBinding {
    name: String,
    base_url: String,
    client: Client,
}

impl HttpBinding {
    /// Create a binding targeting `base_url`. Request URIs are appended to
    /// it verbatim.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(60))
    }

    /// Create a binding with a custom request timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            name: "http-binding".to_string(),
            base_url: base_url.into(),
            client,
        }
    }

    fn error(&self, message: impl Into<String>) -> BindingError {
        BindingError::new(&self.name, message)
    }
}

#[async_trait]
impl Binding for HttpBinding {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &mut Context) -> Result<(), BindingError> {
        let request = ctx.request();
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), request.uri);
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| self.error(format!("invalid method '{}'", request.method)))?;

        let mut outgoing = self
            .client
            .request(method, &url)
            .header("Content-Type", ctx.content_type())
            .body(ctx.content().to_vec());
        for (name, value) in ctx.headers.materialize_request(&request.headers) {
            outgoing = outgoing.header(name, value);
        }

        let response = outgoing
            .send()
            .await
            .map_err(|e| self.error(format!("downstream call to {} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response
            .bytes()
            .await
            .map_err(|e| self.error(format!("reading downstream body failed: {}", e)))?;

        ctx.set_status(status);
        if let Some(content_type) = content_type {
            ctx.set_content_type(content_type);
        }
        ctx.set_content(body.to_vec());
        tracing::debug!(binding = %self.name, url = %url, status, "downstream call complete");
        Ok(())
    }
}
