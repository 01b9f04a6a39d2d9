//! The contract every destination adapter implements.

use crate::{Record, SinkError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Wire payload produced by [`Sink::transform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub body: Vec<u8>,
    pub content_type: String,
}

impl Payload {
    pub fn new(body: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            content_type: content_type.into(),
        }
    }

    /// JSON-encode `value` as an `application/json` payload.
    pub fn json<T: serde::Serialize + ?Sized>(value: &T) -> Result<Self, SinkError> {
        let body = serde_json::to_vec(value).map_err(|e| SinkError::Transform(e.to_string()))?;
        Ok(Self::new(body, "application/json"))
    }
}

/// Response received from a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkResponse {
    pub status_code: u16,
}

impl SinkResponse {
    pub fn new(status_code: u16) -> Self {
        Self { status_code }
    }

    /// Shorthand for a `200 OK` response.
    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// A destination-specific adapter.
///
/// `transform` is a pure mapping from a batch to the vendor's wire shape and
/// runs once per flush. `deliver` performs one network attempt; the pipeline
/// owns retries, timeouts and requeueing.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Map a batch onto the destination's wire format.
    fn transform(&self, batch: &[Record]) -> Result<Payload, SinkError>;

    /// Send a payload once.
    ///
    /// Non-2xx responses should be returned as `Ok(SinkResponse)` so the
    /// pipeline can classify them by status code.
    async fn deliver(
        &self,
        payload: &Payload,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<SinkResponse, SinkError>;
}
