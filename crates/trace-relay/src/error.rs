//! Error types for the relay.

use delivery_pipeline::PipelineError;
use http_sink::HttpSinkError;
use thiserror::Error;

/// Relay error type.
#[derive(Error, Debug)]
pub enum RelayError {
    /// IO error (config file, input stream)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Destinations file is not valid JSON for the expected schema
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No factory registered for a destination's sink kind
    #[error("Unknown sink kind '{kind}' for destination '{destination}'")]
    UnknownSinkKind { destination: String, kind: String },

    /// Pipeline construction or enqueue error
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// HTTP sink construction error
    #[error("HTTP sink error: {0}")]
    HttpSink(#[from] HttpSinkError),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
