//! Pipeline error types.

use thiserror::Error;

/// Synchronous errors returned to callers of a pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Record failed structural validation and was not buffered
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Pipeline is shutting down or stopped
    #[error("Pipeline stopped: {0}")]
    PipelineStopped(String),

    /// Destination configuration rejected at construction
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias using PipelineError.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failure of a delivery attempt sequence, as seen by the flush machinery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Retryable failure (timeouts, 5xx, network errors)
    #[error("Transient delivery error after {attempts} attempt(s): {reason}")]
    Transient {
        reason: String,
        status_code: Option<u16>,
        attempts: u32,
    },

    /// Non-retryable failure (bad request, auth failure, malformed payload)
    #[error("Terminal delivery error after {attempts} attempt(s): {reason}")]
    Terminal {
        reason: String,
        status_code: Option<u16>,
        attempts: u32,
    },
}

impl DeliveryError {
    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// HTTP status code observed on the last attempt, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Transient { status_code, .. } | Self::Terminal { status_code, .. } => {
                *status_code
            }
        }
    }

    /// Number of delivery attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Transient { attempts, .. } | Self::Terminal { attempts, .. } => *attempts,
        }
    }
}

/// Errors reported by a [`Sink`](crate::Sink) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The batch could not be turned into a wire payload
    #[error("Transform failed: {0}")]
    Transform(String),

    /// Network-level failure before a response was received
    #[error("Transport error: {0}")]
    Transport(String),

    /// The sink gave up waiting for a response
    #[error("Request timed out")]
    Timeout,

    /// The destination refused the payload and retrying will not help
    #[error("Rejected: {0}")]
    Rejected(String),
}
