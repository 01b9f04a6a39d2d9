//! Destinations file.
//!
//! ```json
//! {"destinations": [{"name": "langfuse", "kind": "http",
//!   "endpoint": "https://example.test/ingest", "transform": "json",
//!   "batchSize": 100, "flushIntervalMs": 2000,
//!   "backoff": {"type": "exponential", "maxDelayMs": 8000, "jitter": 0.2},
//!   "headers": {"Authorization": "Bearer ${LANGFUSE_TOKEN}"}}]}
//! ```

use crate::error::{RelayError, RelayResult};
use delivery_pipeline::{Backoff, DestinationConfig, TerminalErrorPolicy};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

fn default_kind() -> String {
    "http".to_string()
}

fn default_transform() -> String {
    "json".to_string()
}

/// Top-level destinations file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RelayConfig {
    pub destinations: Vec<DestinationSpec>,
}

/// Retry delay strategy as written in the file.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BackoffSpec {
    Fixed,
    #[serde(rename_all = "camelCase")]
    Exponential {
        max_delay_ms: u64,
        #[serde(default)]
        jitter: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TerminalPolicySpec {
    DeadLetter,
    Requeue,
}

/// One destination entry. Unset fields fall back to pipeline defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DestinationSpec {
    pub name: String,

    /// Sink factory to use (`http`, `stdout`, or anything registered).
    #[serde(default = "default_kind")]
    pub kind: String,

    pub endpoint: Option<String>,

    /// Transform name from the transform registry.
    #[serde(default = "default_transform")]
    pub transform: String,

    pub batch_size: Option<usize>,
    pub flush_interval_ms: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub shutdown_timeout_ms: Option<u64>,
    pub backoff: Option<BackoffSpec>,
    pub terminal_policy: Option<TerminalPolicySpec>,
    pub max_buffered_records: Option<usize>,

    /// Values may reference environment variables as `${NAME}`.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl RelayConfig {
    /// Read and validate a destinations file.
    pub fn load(path: &Path) -> RelayResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> RelayResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// At least one destination, with unique names.
    pub fn validate(&self) -> RelayResult<()> {
        if self.destinations.is_empty() {
            return Err(RelayError::Config("no destinations configured".to_string()));
        }

        let mut seen = HashSet::new();
        for spec in &self.destinations {
            if !seen.insert(spec.name.as_str()) {
                return Err(RelayError::Config(format!(
                    "duplicate destination name '{}'",
                    spec.name
                )));
            }
        }
        Ok(())
    }
}

impl DestinationSpec {
    /// Build a validated pipeline configuration, resolving `${NAME}` header
    /// references through `lookup`.
    pub fn to_destination_config(
        &self,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> RelayResult<DestinationConfig> {
        let mut config = DestinationConfig::new(&self.name);

        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(ms) = self.flush_interval_ms {
            config.flush_interval = Duration::from_millis(ms);
        }
        if let Some(retry_attempts) = self.retry_attempts {
            config.retry_attempts = retry_attempts;
        }
        if let Some(ms) = self.retry_delay_ms {
            config.retry_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.timeout_ms {
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.shutdown_timeout_ms {
            config.shutdown_timeout = Duration::from_millis(ms);
        }
        if let Some(backoff) = self.backoff {
            config.backoff = match backoff {
                BackoffSpec::Fixed => Backoff::Fixed,
                BackoffSpec::Exponential { max_delay_ms, jitter } => Backoff::Exponential {
                    max_delay: Duration::from_millis(max_delay_ms),
                    jitter,
                },
            };
        }
        if let Some(policy) = self.terminal_policy {
            config.terminal_policy = match policy {
                TerminalPolicySpec::DeadLetter => TerminalErrorPolicy::DeadLetter,
                TerminalPolicySpec::Requeue => TerminalErrorPolicy::Requeue,
            };
        }
        config.max_buffered_records = self.max_buffered_records;

        for (key, value) in &self.headers {
            let resolved = resolve_env(value, lookup).map_err(|reason| {
                RelayError::Config(format!(
                    "destination '{}': header '{}' {}",
                    self.name, key, reason
                ))
            })?;
            config.headers.insert(key.clone(), resolved);
        }

        config.validate()?;
        Ok(config)
    }
}

/// Substitute every `${NAME}` in `value`.
fn resolve_env(value: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Result<String, String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| "has an unterminated '${' reference".to_string())?;
        let name = &after[..end];
        if name.is_empty() {
            return Err("has an empty '${}' reference".to_string());
        }
        let resolved = lookup(name)
            .ok_or_else(|| format!("references unset environment variable '{name}'"))?;
        out.push_str(&resolved);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Environment lookup used outside tests.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}
