//! HTTP sink error types.

use thiserror::Error;

/// Errors raised while building an HTTP sink.
///
/// Delivery failures are reported as [`delivery_pipeline::SinkError`] instead.
#[derive(Error, Debug)]
pub enum HttpSinkError {
    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// Endpoint is not an absolute http(s) URL
    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// No transform registered under this name
    #[error("Unknown transform '{name}' (available: {available})")]
    UnknownTransform { name: String, available: String },
}

/// Result type alias using HttpSinkError.
pub type HttpSinkResult<T> = Result<T, HttpSinkError>;
