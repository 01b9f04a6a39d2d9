//! Trace relay: reads trace records and delivers them to every configured
//! destination through its own delivery pipeline.
//!
//! This crate provides:
//! - RelayConfig: the JSON destinations file
//! - SinkFactories: sink construction by destination kind
//! - StdoutSink: prints batches, for local runs
//! - Relay: NDJSON ingest, fan-out and coordinated shutdown

pub mod config;
pub mod error;
mod factories;
mod relay;
mod stdout;

pub use config::{BackoffSpec, DestinationSpec, RelayConfig, TerminalPolicySpec};
pub use error::{RelayError, RelayResult};
pub use factories::{SinkFactories, SinkFactory};
pub use relay::{DestinationSummary, IngestStats, Relay};
pub use stdout::StdoutSink;
