//! Per-request execution context threaded through every pipeline stage.
//!
//! A [`Context`] is created once per inbound request, handed `&mut` to each
//! filter, channel send, and the binding in turn, then consumed to build
//! the final response. It is never shared across requests, so it carries no
//! synchronization of its own.

use crate::headers::HeaderDirectives;
use crate::types::{PipelineRequest, STATUS_INTERNAL_ERROR};
use std::collections::HashMap;

/// Mutable unit of work for one pipeline execution.
///
/// The request snapshot is immutable; everything a stage is allowed to
/// change (content, status, headers, claims, fault state) lives alongside
/// it. The fault flag is one-way: once set it cannot be cleared.
#[derive(Debug)]
pub struct Context {
    request: PipelineRequest,
    status: Option<u16>,
    content: Vec<u8>,
    content_type: String,
    /// Custom header directives accumulated by stages.
    pub headers: HeaderDirectives,
    /// Identity claims populated by filters, consumed by claim-derived
    /// header directives.
    pub claims: HashMap<String, String>,
    is_fatal: bool,
    error: Option<String>,
    trail: Vec<String>,
}

impl Context {
    /// Build a context from an inbound request. The request body seeds the
    /// content; the binding or filters may replace it later.
    pub fn new(request: PipelineRequest) -> Self {
        let content = request.body.clone();
        let content_type = request
            .header("content-type")
            .unwrap_or("application/octet-stream")
            .to_string();
        Self {
            request,
            status: None,
            content,
            content_type,
            headers: HeaderDirectives::new(),
            claims: HashMap::new(),
            is_fatal: false,
            error: None,
            trail: Vec::new(),
        }
    }

    /// The immutable request snapshot captured at creation.
    pub fn request(&self) -> &PipelineRequest {
        &self.request
    }

    /// Explicit status recorded by a stage, if any.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Record a status code. Stages may overwrite each other while the
    /// context is healthy; once the context is fatal the recorded fault
    /// status is kept and this call does nothing.
    pub fn set_status(&mut self, status: u16) {
        if !self.is_fatal {
            self.status = Some(status);
        }
    }

    /// Byte view over the content.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Replace the content bytes.
    pub fn set_content(&mut self, content: impl Into<Vec<u8>>) {
        self.content = content.into();
    }

    /// UTF-8 text view over the same bytes as [`content`](Self::content).
    /// Lossy: invalid sequences decode to the replacement character.
    pub fn content_text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    /// Replace the content with UTF-8 bytes of `text`. Reading it back via
    /// either view returns exactly what was written.
    pub fn set_content_text(&mut self, text: impl AsRef<str>) {
        self.content = text.as_ref().as_bytes().to_vec();
    }

    /// MIME type describing the current content.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = content_type.into();
    }

    /// Whether a stage has marked this execution fatal.
    pub fn is_fatal(&self) -> bool {
        self.is_fatal
    }

    /// The first fatal error message, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Mark the execution fatal.
    ///
    /// One-way: there is no API to clear the flag. The first fatal caller
    /// wins the recorded status and error message; later calls keep the
    /// flag set but do not overwrite either. An explicit `status` takes
    /// precedence over whatever a stage recorded earlier; with `None` the
    /// earlier status is kept, defaulting to 500.
    pub fn mark_fatal(&mut self, status: Option<u16>, error: impl Into<String>) {
        if !self.is_fatal {
            self.error = Some(error.into());
            self.status = Some(
                status.unwrap_or_else(|| self.status.unwrap_or(STATUS_INTERNAL_ERROR)),
            );
        }
        self.is_fatal = true;
    }

    /// Append a stage name to the execution trail.
    pub fn record(&mut self, stage: impl Into<String>) {
        self.trail.push(stage.into());
    }

    /// Names of the stages that ran, in execution order.
    pub fn trail(&self) -> &[String] {
        &self.trail
    }
}
