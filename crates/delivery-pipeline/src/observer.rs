//! Hooks for wiring pipeline activity into logs, metrics or alerting.

use crate::{DeliveryError, ShutdownReport};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Callbacks invoked by a pipeline. Every method defaults to a no-op.
///
/// Implementations are called inline on the flush path and must not block.
pub trait PipelineObserver: Send + Sync {
    fn on_flush_start(&self, _destination: &str, _count: usize) {}

    fn on_flush_success(&self, _destination: &str, _count: usize, _attempts: u32) {}

    fn on_flush_failure(&self, _destination: &str, _error: &DeliveryError, _count: usize) {}

    fn on_dead_letter(&self, _destination: &str, _count: usize) {}

    fn on_records_dropped(&self, _destination: &str, _count: usize) {}

    fn on_shutdown(&self, _destination: &str, _report: &ShutdownReport) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Observer that logs through `tracing`. The default for new pipelines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_flush_start(&self, destination: &str, count: usize) {
        debug!(destination = %destination, count = count, "Flush started");
    }

    fn on_flush_success(&self, destination: &str, count: usize, attempts: u32) {
        info!(
            destination = %destination,
            count = count,
            attempts = attempts,
            "Batch delivered"
        );
    }

    fn on_flush_failure(&self, destination: &str, error: &DeliveryError, count: usize) {
        warn!(
            destination = %destination,
            count = count,
            retryable = error.is_retryable(),
            error = %error,
            "Batch delivery failed"
        );
    }

    fn on_dead_letter(&self, destination: &str, count: usize) {
        error!(destination = %destination, count = count, "Batch dead-lettered");
    }

    fn on_records_dropped(&self, destination: &str, count: usize) {
        warn!(
            destination = %destination,
            count = count,
            "Buffer full, dropped oldest records"
        );
    }

    fn on_shutdown(&self, destination: &str, report: &ShutdownReport) {
        if report.undelivered > 0 {
            warn!(
                destination = %destination,
                delivered = report.delivered,
                undelivered = report.undelivered,
                timed_out = report.timed_out,
                "Pipeline stopped with undelivered records"
            );
        } else {
            info!(
                destination = %destination,
                delivered = report.delivered,
                "Pipeline stopped"
            );
        }
    }
}

/// Pipeline activity as plain data.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    FlushStarted {
        destination: String,
        count: usize,
    },
    FlushSucceeded {
        destination: String,
        count: usize,
        attempts: u32,
    },
    FlushFailed {
        destination: String,
        error: DeliveryError,
        count: usize,
    },
    DeadLettered {
        destination: String,
        count: usize,
    },
    RecordsDropped {
        destination: String,
        count: usize,
    },
    Stopped {
        destination: String,
        report: ShutdownReport,
    },
}

#[derive(Debug, Clone)]
enum EventSender {
    Unbounded(mpsc::UnboundedSender<PipelineEvent>),
    Bounded(mpsc::Sender<PipelineEvent>),
}

/// Observer that forwards every callback as a [`PipelineEvent`] on a channel.
///
/// Events are dropped silently once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: EventSender,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of an unbounded channel.
    ///
    /// The receiver must be drained; undrained events accumulate without limit.
    /// Use [`ChannelObserver::bounded`] when the consumer may fall behind.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let observer = Self {
            sender: EventSender::Unbounded(sender),
        };
        (observer, receiver)
    }

    /// Create an observer whose channel holds at most `capacity` events.
    ///
    /// When the channel is full, new events are dropped.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let observer = Self {
            sender: EventSender::Bounded(sender),
        };
        (observer, receiver)
    }

    fn emit(&self, event: PipelineEvent) {
        match &self.sender {
            EventSender::Unbounded(sender) => {
                let _ = sender.send(event);
            }
            EventSender::Bounded(sender) => {
                if let Err(mpsc::error::TrySendError::Full(event)) = sender.try_send(event) {
                    debug!(?event, "Observer channel full, dropping event");
                }
            }
        }
    }
}

impl PipelineObserver for ChannelObserver {
    fn on_flush_start(&self, destination: &str, count: usize) {
        self.emit(PipelineEvent::FlushStarted {
            destination: destination.to_string(),
            count,
        });
    }

    fn on_flush_success(&self, destination: &str, count: usize, attempts: u32) {
        self.emit(PipelineEvent::FlushSucceeded {
            destination: destination.to_string(),
            count,
            attempts,
        });
    }

    fn on_flush_failure(&self, destination: &str, error: &DeliveryError, count: usize) {
        self.emit(PipelineEvent::FlushFailed {
            destination: destination.to_string(),
            error: error.clone(),
            count,
        });
    }

    fn on_dead_letter(&self, destination: &str, count: usize) {
        self.emit(PipelineEvent::DeadLettered {
            destination: destination.to_string(),
            count,
        });
    }

    fn on_records_dropped(&self, destination: &str, count: usize) {
        self.emit(PipelineEvent::RecordsDropped {
            destination: destination.to_string(),
            count,
        });
    }

    fn on_shutdown(&self, destination: &str, report: &ShutdownReport) {
        self.emit(PipelineEvent::Stopped {
            destination: destination.to_string(),
            report: *report,
        });
    }
}
