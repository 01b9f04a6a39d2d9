//! # Relay Observability
//!
//! Logging setup shared by the relay binaries.
//!
//! Libraries only use `tracing` macros. The binary calls [`init`] or
//! [`init_with_config`] once at startup and decides where lines go:
//!
//! - `Compact` format: human-readable lines on stderr
//! - `Json` format: one JSON object per line (see [`LogEntry`])
//! - `log_path`: JSONL appended to a file, line-flushed so it can be tailed
//!
//! Stdout is never written to; the relay may be using it for sink output.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() -> anyhow::Result<()> {
//!     relay_observability::init_with_config(relay_observability::LogConfig {
//!         service_name: "trace-relay".into(),
//!         default_level: "debug".into(),
//!         format: relay_observability::LogFormat::Json,
//!         ..Default::default()
//!     })?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

mod file;
mod json_layer;

pub use file::LogFileWriter;
pub use json_layer::{JsonLayer, LogEntry};

use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Console output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}' (expected compact or json)")),
        }
    }
}

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Included in every JSON line.
    pub service_name: String,

    /// Filter used when `RUST_LOG` is not set (e.g. "info", "delivery_pipeline=debug").
    pub default_level: String,

    pub format: LogFormat,

    /// Append JSONL here instead of writing to stderr.
    pub log_path: Option<PathBuf>,

    /// Keep console output on stderr when `log_path` is set.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "trace-relay".into(),
            default_level: "info".into(),
            format: LogFormat::Compact,
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Errors raised while installing the global subscriber.
#[derive(Error, Debug)]
pub enum InitError {
    #[error("Failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid log filter '{0}'")]
    InvalidFilter(String),

    #[error("Global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// Initialize logging with default settings for `service_name`.
pub fn init(service_name: &str) -> Result<(), InitError> {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Initialize logging with custom configuration.
///
/// `RUST_LOG` takes precedence over `default_level`.
pub fn init_with_config(config: LogConfig) -> Result<(), InitError> {
    let filter = build_filter(&config.default_level)?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if let Some(path) = &config.log_path {
        let writer = LogFileWriter::open(path).map_err(|source| InitError::LogFile {
            path: path.clone(),
            source,
        })?;
        layers.push(JsonLayer::new(config.service_name.clone(), writer).boxed());
    }

    if config.log_path.is_none() || config.also_stderr {
        layers.push(console_layer(&config));
    }

    tracing_subscriber::registry()
        .with(layers.with_filter(filter))
        .try_init()
        .map_err(|e| InitError::AlreadyInitialized(e.to_string()))?;

    tracing::debug!(
        service = %config.service_name,
        format = ?config.format,
        log_path = ?config.log_path,
        "Logging initialized"
    );
    Ok(())
}

fn build_filter(default_level: &str) -> Result<EnvFilter, InitError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_level)
            .map_err(|_| InitError::InvalidFilter(default_level.to_string())),
    }
}

fn console_layer(config: &LogConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    match config.format {
        LogFormat::Json => JsonLayer::new(config.service_name.clone(), io::stderr).boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "trace-relay");
        assert_eq!(config.default_level, "info");
        assert_eq!(config.format, LogFormat::Compact);
        assert!(config.log_path.is_none());
        assert!(!config.also_stderr);
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("pretty".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_invalid_default_filter_is_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(matches!(
            build_filter("delivery_pipeline=verbose"),
            Err(InitError::InvalidFilter(_))
        ));
    }
}
