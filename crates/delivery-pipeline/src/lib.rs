//! Buffered delivery of trace records to observability backends.
//!
//! This crate provides:
//! - DeliveryPipeline: per-destination buffer, flush worker and shutdown sequence
//! - FlushController: size/time flush triggers with single-flight delivery
//! - Retrier: bounded retry with status-code classification and backoff
//! - Sink: the trait destinations implement to transform and send batches
//! - PipelineObserver / DeadLetterSink: hooks for monitoring and failed batches

mod buffer;
mod config;
mod dead_letter;
mod error;
mod flush;
mod observer;
mod pipeline;
mod record;
mod retry;
mod sink;

#[cfg(test)]
mod tests;

pub use buffer::{Append, Buffer};
pub use config::{
    Backoff, DestinationConfig, TerminalErrorPolicy, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL,
    DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY, DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_TIMEOUT,
};
pub use dead_letter::{DeadLetter, DeadLetterSink, LogDeadLetters, MemoryDeadLetters};
pub use error::{DeliveryError, PipelineError, PipelineResult, SinkError};
pub use flush::{DeliveryOutcome, FlushController, FlushOutcome};
pub use observer::{ChannelObserver, NoopObserver, PipelineEvent, PipelineObserver, TracingObserver};
pub use pipeline::{DeliveryPipeline, PipelineBuilder, PipelineState, PipelineStats, ShutdownReport};
pub use record::{Record, SpanEvent, SpanStatus, TracePayload};
pub use retry::{classify_sink_error, classify_status, ErrorClass, Retrier};
pub use sink::{Payload, Sink, SinkResponse};
