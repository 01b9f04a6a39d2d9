//! Destination configuration.

use crate::{PipelineError, PipelineResult};
use std::collections::HashMap;
use std::time::Duration;

/// Default number of buffered records that triggers a flush.
pub const DEFAULT_BATCH_SIZE: usize = 512;
/// Default period of the time-based flush.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
/// Default number of retries after the first attempt.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
/// Default delay between retries.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default upper bound on the whole shutdown sequence.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay strategy between retryable attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Sleep `retry_delay` between every attempt.
    Fixed,
    /// Double `retry_delay` per retry up to `max_delay`, randomized by
    /// `+/- jitter` (a fraction in `0.0..=1.0`).
    Exponential { max_delay: Duration, jitter: f64 },
}

/// What to do with a batch that failed with a non-retryable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminalErrorPolicy {
    /// Hand the batch to the dead-letter sink and move on.
    #[default]
    DeadLetter,
    /// Put the batch back at the front of the buffer like a transient failure.
    Requeue,
}

/// Static configuration for one destination pipeline.
///
/// Immutable for the pipeline's lifetime and validated once by
/// [`DeliveryPipeline::new`](crate::DeliveryPipeline::new).
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationConfig {
    /// Destination name, used in logs and errors.
    pub name: String,
    /// Buffered record count that triggers a flush.
    pub batch_size: usize,
    /// Period of the time-based flush.
    pub flush_interval: Duration,
    /// Retries after the first attempt (`3` means up to 4 attempts).
    pub retry_attempts: u32,
    /// Base delay between retryable attempts.
    pub retry_delay: Duration,
    /// Per-attempt delivery timeout.
    pub timeout: Duration,
    /// Upper bound on waiting for the worker plus the final flush.
    pub shutdown_timeout: Duration,
    pub backoff: Backoff,
    pub terminal_policy: TerminalErrorPolicy,
    /// Oldest records are evicted beyond this many. `None` is unbounded.
    pub max_buffered_records: Option<usize>,
    /// Opaque headers (credentials included) passed to the sink verbatim.
    pub headers: HashMap<String, String>,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            timeout: DEFAULT_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            backoff: Backoff::Fixed,
            terminal_policy: TerminalErrorPolicy::DeadLetter,
            max_buffered_records: None,
            headers: HashMap::new(),
        }
    }
}

impl DestinationConfig {
    /// Create a configuration with defaults for the named destination.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    pub fn with_retry_attempts(mut self, retry_attempts: u32) -> Self {
        self.retry_attempts = retry_attempts;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_terminal_policy(mut self, policy: TerminalErrorPolicy) -> Self {
        self.terminal_policy = policy;
        self
    }

    pub fn with_max_buffered_records(mut self, max: usize) -> Self {
        self.max_buffered_records = Some(max);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Reject values that make no sense at runtime.
    pub fn validate(&self) -> PipelineResult<()> {
        let invalid = |reason: String| -> PipelineResult<()> {
            Err(PipelineError::InvalidConfig(format!(
                "destination '{}': {}",
                self.name, reason
            )))
        };

        if self.name.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "destination name cannot be empty".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return invalid("batch size must be at least 1".to_string());
        }
        if self.flush_interval.is_zero() {
            return invalid("flush interval must be greater than 0".to_string());
        }
        if self.timeout.is_zero() {
            return invalid("timeout must be greater than 0".to_string());
        }
        if self.shutdown_timeout.is_zero() {
            return invalid("shutdown timeout must be greater than 0".to_string());
        }
        if let Some(max) = self.max_buffered_records {
            if max < self.batch_size {
                return invalid(format!(
                    "max buffered records ({max}) must be at least the batch size ({})",
                    self.batch_size
                ));
            }
        }
        if let Backoff::Exponential { max_delay, jitter } = self.backoff {
            if max_delay < self.retry_delay {
                return invalid("backoff max delay must be at least the retry delay".to_string());
            }
            if !(0.0..=1.0).contains(&jitter) {
                return invalid(format!("backoff jitter must be within 0.0..=1.0, got {jitter}"));
            }
        }

        Ok(())
    }
}
