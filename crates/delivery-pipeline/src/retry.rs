//! Bounded retry around a single sink delivery.

use crate::{Backoff, DeliveryError, DestinationConfig, Payload, Sink, SinkError};
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Whether a failed attempt is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Terminal,
}

/// Classify a non-2xx HTTP status code.
///
/// 4xx means the request itself is wrong and will fail again, except
/// 408 (Request Timeout) and 429 (Too Many Requests). Everything else,
/// including 5xx and unexpected codes, is retryable.
pub fn classify_status(status_code: u16) -> ErrorClass {
    match status_code {
        408 | 429 => ErrorClass::Retryable,
        400..=499 => ErrorClass::Terminal,
        _ => ErrorClass::Retryable,
    }
}

/// Classify an error raised by a sink.
pub fn classify_sink_error(error: &SinkError) -> ErrorClass {
    match error {
        SinkError::Transport(_) | SinkError::Timeout => ErrorClass::Retryable,
        SinkError::Transform(_) | SinkError::Rejected(_) => ErrorClass::Terminal,
    }
}

/// One failed attempt, before the attempt count is known.
#[derive(Debug)]
struct AttemptFailure {
    reason: String,
    status_code: Option<u16>,
    class: ErrorClass,
}

impl AttemptFailure {
    fn into_error(self, attempts: u32) -> DeliveryError {
        match self.class {
            ErrorClass::Retryable => DeliveryError::Transient {
                reason: self.reason,
                status_code: self.status_code,
                attempts,
            },
            ErrorClass::Terminal => DeliveryError::Terminal {
                reason: self.reason,
                status_code: self.status_code,
                attempts,
            },
        }
    }
}

/// Delivers a payload with up to `retry_attempts` retries.
#[derive(Debug, Clone)]
pub struct Retrier {
    retry_attempts: u32,
    retry_delay: Duration,
    timeout: Duration,
    backoff: Backoff,
}

impl Retrier {
    pub fn new(retry_attempts: u32, retry_delay: Duration, timeout: Duration, backoff: Backoff) -> Self {
        Self {
            retry_attempts,
            retry_delay,
            timeout,
            backoff,
        }
    }

    pub fn from_config(config: &DestinationConfig) -> Self {
        Self::new(
            config.retry_attempts,
            config.retry_delay,
            config.timeout,
            config.backoff,
        )
    }

    /// Maximum number of attempts per send.
    pub fn max_attempts(&self) -> u32 {
        self.retry_attempts.saturating_add(1)
    }

    /// Deliver `payload`, retrying retryable failures.
    ///
    /// Returns the number of attempts used on success. Terminal failures are
    /// returned after the first attempt without sleeping.
    pub async fn send(
        &self,
        sink: &dyn Sink,
        payload: &Payload,
        headers: &HashMap<String, String>,
    ) -> Result<u32, DeliveryError> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let failure = match self.attempt(sink, payload, headers).await {
                Ok(()) => {
                    debug!(sink = %sink.name(), attempt = attempt, "Delivery attempt succeeded");
                    return Ok(attempt);
                }
                Err(failure) => failure,
            };

            if failure.class == ErrorClass::Terminal {
                warn!(
                    sink = %sink.name(),
                    attempt = attempt,
                    status = ?failure.status_code,
                    error = %failure.reason,
                    "Terminal delivery failure, not retrying"
                );
                return Err(failure.into_error(attempt));
            }

            if attempt >= self.max_attempts() {
                warn!(
                    sink = %sink.name(),
                    attempt = attempt,
                    error = %failure.reason,
                    "Retries exhausted"
                );
                return Err(failure.into_error(attempt));
            }

            let delay = self.delay_for_retry(attempt);
            warn!(
                sink = %sink.name(),
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure.reason,
                "Delivery failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(
        &self,
        sink: &dyn Sink,
        payload: &Payload,
        headers: &HashMap<String, String>,
    ) -> Result<(), AttemptFailure> {
        let result = tokio::time::timeout(self.timeout, sink.deliver(payload, headers, self.timeout)).await;

        match result {
            Err(_) => Err(AttemptFailure {
                reason: format!("attempt timed out after {}ms", self.timeout.as_millis()),
                status_code: None,
                class: ErrorClass::Retryable,
            }),
            Ok(Err(e)) => Err(AttemptFailure {
                class: classify_sink_error(&e),
                reason: e.to_string(),
                status_code: None,
            }),
            Ok(Ok(response)) if response.is_success() => Ok(()),
            Ok(Ok(response)) => Err(AttemptFailure {
                reason: format!("HTTP {}", response.status_code),
                status_code: Some(response.status_code),
                class: classify_status(response.status_code),
            }),
        }
    }

    /// Delay before retry number `retry` (1 is the first retry).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let unit = match self.backoff {
            Backoff::Fixed => 0.5,
            Backoff::Exponential { .. } => rand::thread_rng().gen_range(0.0..=1.0),
        };
        self.delay_with_jitter(retry, unit)
    }

    /// Delay with an explicit jitter sample in `0.0..=1.0` (0.5 means none).
    pub fn delay_with_jitter(&self, retry: u32, unit: f64) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.retry_delay,
            Backoff::Exponential { max_delay, jitter } => {
                let exponent = retry.saturating_sub(1).min(30) as i32;
                let base_ns = (self.retry_delay.as_nanos() as f64 * 2f64.powi(exponent))
                    .min(max_delay.as_nanos() as f64);
                let offset = (unit.clamp(0.0, 1.0) * 2.0 - 1.0) * jitter;
                Duration::from_nanos((base_ns * (1.0 + offset)).max(0.0).round() as u64)
            }
        }
    }
}
