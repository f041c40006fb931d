use serde::{Deserialize, Serialize};

/// Default status when no stage sets one and the pipeline completes cleanly.
pub const STATUS_OK: u16 = 200;

/// Status used for fatal states that never recorded an explicit code.
pub const STATUS_INTERNAL_ERROR: u16 = 500;

/// Inbound request handed to a pipeline execution.
///
/// Captured once at context creation and immutable from then on. Stages
/// that need to change what goes downstream mutate the context content,
/// not the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRequest {
    /// HTTP-style method (`GET`, `POST`, ...).
    pub method: String,

    /// Target URI, passed through to the binding unmodified.
    pub uri: String,

    /// Request headers in arrival order.
    pub headers: Vec<(String, String)>,

    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl PipelineRequest {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Add a request header (builder style).
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body bytes (builder style).
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Look up the first header with the given name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Final response materialized from a completed pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResponse {
    /// Result status code.
    pub status: u16,

    /// Response headers, already materialized from the context's
    /// header directives.
    pub headers: Vec<(String, String)>,

    /// Response body bytes.
    pub body: Vec<u8>,
}

impl PipelineResponse {
    /// A bare fault response carrying no headers and no body.
    ///
    /// This is what the caller receives when an unexpected failure escapes
    /// the stages: well-formed, but deliberately content-free.
    pub fn fault(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// UTF-8 view over the body, lossy for non-UTF-8 bytes.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
