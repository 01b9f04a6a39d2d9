//! The per-destination delivery pipeline.
//!
//! A [`DeliveryPipeline`] owns one [`Buffer`], one [`FlushController`] and the
//! background worker that drives it. Producers call [`DeliveryPipeline::enqueue`]
//! from any thread; delivery happens on the worker. Lifecycle:
//!
//! ```text
//! Active --shutdown()--> ShuttingDown --final flush / deadline--> Stopped
//! ```

use crate::flush::spawn_flush_worker;
use crate::{
    Append, Buffer, DeadLetterSink, DestinationConfig, FlushController, FlushOutcome,
    LogDeadLetters, PipelineError, PipelineObserver, PipelineResult, Retrier, Sink, TracePayload,
    TracingObserver,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const ACTIVE: u8 = 0;
const SHUTTING_DOWN: u8 = 1;
const STOPPED: u8 = 2;

/// Lifecycle state of a pipeline. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Active,
    ShuttingDown,
    Stopped,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            ACTIVE => PipelineState::Active,
            SHUTTING_DOWN => PipelineState::ShuttingDown,
            _ => PipelineState::Stopped,
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Active => write!(f, "active"),
            PipelineState::ShuttingDown => write!(f, "shutting_down"),
            PipelineState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Outcome of [`DeliveryPipeline::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Records delivered by the final flush.
    pub delivered: usize,
    /// Records that never reached the sink.
    pub undelivered: usize,
    /// The shutdown deadline elapsed before the final flush finished.
    pub timed_out: bool,
}

/// Point-in-time counters for a pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub buffered: usize,
    pub in_flight: usize,
    pub delivered: u64,
    pub dead_lettered: u64,
    pub dropped: u64,
    pub failed_flushes: u64,
}

/// Builder for pipelines that need a non-default observer or dead-letter sink.
pub struct PipelineBuilder {
    config: DestinationConfig,
    sink: Arc<dyn Sink>,
    observer: Arc<dyn PipelineObserver>,
    dead_letters: Arc<dyn DeadLetterSink>,
}

impl PipelineBuilder {
    pub fn observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn dead_letters(mut self, dead_letters: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = dead_letters;
        self
    }

    /// Validate the configuration and start the flush worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> PipelineResult<DeliveryPipeline> {
        self.config.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(PipelineError::InvalidConfig(format!(
                "destination '{}': pipeline must be created inside a Tokio runtime",
                self.config.name
            )));
        }

        let buffer = Arc::new(Buffer::new(self.config.max_buffered_records));
        let controller = Arc::new(FlushController::new(
            self.config.name.clone(),
            buffer.clone(),
            self.sink,
            Retrier::from_config(&self.config),
            self.config.headers.clone(),
            self.config.batch_size,
            self.config.terminal_policy,
            self.observer.clone(),
            self.dead_letters,
        ));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let worker = spawn_flush_worker(controller.clone(), self.config.flush_interval, shutdown_rx);

        info!(
            destination = %self.config.name,
            batch_size = self.config.batch_size,
            flush_interval_ms = self.config.flush_interval.as_millis() as u64,
            retry_attempts = self.config.retry_attempts,
            "Delivery pipeline started"
        );

        Ok(DeliveryPipeline {
            config: self.config,
            buffer,
            controller,
            state: AtomicU8::new(ACTIVE),
            worker: Mutex::new(Some(worker)),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            observer: self.observer,
        })
    }
}

/// Buffered, batched, retried delivery of trace records to one sink.
pub struct DeliveryPipeline {
    config: DestinationConfig,
    buffer: Arc<Buffer>,
    controller: Arc<FlushController>,
    state: AtomicU8,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    observer: Arc<dyn PipelineObserver>,
}

impl DeliveryPipeline {
    /// Start a pipeline with the tracing observer and logging dead-letter sink.
    pub fn new(config: DestinationConfig, sink: Arc<dyn Sink>) -> PipelineResult<Self> {
        Self::builder(config, sink).build()
    }

    pub fn builder(config: DestinationConfig, sink: Arc<dyn Sink>) -> PipelineBuilder {
        PipelineBuilder {
            config,
            sink,
            observer: Arc::new(TracingObserver),
            dead_letters: Arc::new(LogDeadLetters),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DestinationConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Records waiting in the buffer, not counting an in-flight batch.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> PipelineStats {
        let counters = &self.controller.counters;
        PipelineStats {
            buffered: self.buffer.len(),
            in_flight: self.controller.in_flight_records(),
            delivered: counters.delivered.load(Ordering::Relaxed),
            dead_lettered: counters.dead_lettered.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            failed_flushes: counters.failed_flushes.load(Ordering::Relaxed),
        }
    }

    /// Validate and buffer a payload. Never blocks on delivery.
    ///
    /// Returns the sequence number assigned to the record.
    pub fn enqueue(&self, payload: TracePayload) -> PipelineResult<u64> {
        if self.state() != PipelineState::Active {
            return Err(self.stopped_error());
        }
        payload.validate()?;

        match self.buffer.append(payload) {
            Append::Closed(_) => Err(self.stopped_error()),
            Append::Accepted { sequence, evicted } => {
                self.controller.report_dropped(evicted.len());
                if self.controller.size_trigger_reached() {
                    self.controller.request_flush();
                }
                Ok(sequence)
            }
        }
    }

    /// Flush now. Returns [`FlushOutcome::Coalesced`] if a flush is already running.
    pub async fn flush(&self) -> FlushOutcome {
        self.controller.try_flush().await
    }

    /// Stop the worker, deliver what is left and close the pipeline.
    ///
    /// Bounded by the configured shutdown timeout. Only the first call does
    /// any work and gets a report; later or concurrent calls return `None`.
    pub async fn shutdown(&self) -> Option<ShutdownReport> {
        if self
            .state
            .compare_exchange(ACTIVE, SHUTTING_DOWN, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }

        info!(
            destination = %self.config.name,
            buffered = self.buffer.len(),
            "Shutting down delivery pipeline"
        );

        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
        let mut worker = self.worker.lock().take();

        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            if let Some(handle) = worker.as_mut() {
                if let Err(e) = handle.await {
                    warn!(destination = %self.config.name, error = %e, "Flush worker ended abnormally");
                }
            }
            self.controller.flush_final().await
        })
        .await;

        let report = match drained {
            Ok(final_flush) => ShutdownReport {
                delivered: final_flush.delivered,
                undelivered: final_flush.undelivered,
                timed_out: false,
            },
            Err(_) => {
                if let Some(handle) = worker.as_ref() {
                    handle.abort();
                }
                // The cancelled batch is older than anything still buffered
                let mut stranded = self.controller.take_in_flight();
                stranded.extend(self.buffer.snapshot_and_close());
                let undelivered = stranded.len();
                warn!(
                    destination = %self.config.name,
                    timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                    undelivered = undelivered,
                    "Shutdown deadline elapsed"
                );
                self.controller.abandon(stranded);
                ShutdownReport {
                    delivered: 0,
                    undelivered,
                    timed_out: true,
                }
            }
        };

        self.state.store(STOPPED, Ordering::SeqCst);
        self.observer.on_shutdown(&self.config.name, &report);
        Some(report)
    }

    fn stopped_error(&self) -> PipelineError {
        PipelineError::PipelineStopped(format!(
            "destination '{}' is {}",
            self.config.name,
            self.state()
        ))
    }
}

impl Drop for DeliveryPipeline {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for DeliveryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryPipeline")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .field("buffered", &self.buffer.len())
            .finish()
    }
}
