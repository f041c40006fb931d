use thiserror::Error;

/// Errors produced by the pipeline and its components.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON encoding/decoding failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem failure in a bulk store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A channel operation failed against its backing transport.
    #[error("Channel '{channel}' failed: {message}")]
    ChannelFailed { channel: String, message: String },

    /// A channel was asked to do something its current state does not allow.
    #[error("Channel '{channel}' is {state} and cannot {operation}")]
    InvalidChannelState {
        channel: String,
        state: String,
        operation: String,
    },

    /// An inbound transport message carried no recognizable discriminator tag.
    #[error("Channel '{channel}' does not understand message: {message}")]
    UnknownMessageTag { channel: String, message: String },

    /// A bulk-stored object referenced by an offload envelope was not found.
    #[error("Bulk object not found: {container}/{key}")]
    BulkObjectMissing { container: String, key: String },

    /// The downstream binding call failed.
    #[error("Binding '{binding}' failed: {message}")]
    BindingFailed { binding: String, message: String },

    /// Invalid configuration detected at build time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A registry lookup used a key nothing was registered under.
    #[error("No factory registered for key '{0}'")]
    UnknownKey(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
