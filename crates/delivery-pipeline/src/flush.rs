//! Flush triggering and single-flight batch delivery.

use crate::{
    Buffer, DeadLetterSink, DeliveryError, PipelineObserver, Record, Retrier, Sink,
    TerminalErrorPolicy,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Result of delivering one detached batch.
#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered { count: usize, attempts: u32 },
    /// The batch is handed back so the caller can requeue or dead-letter it.
    Failed {
        error: DeliveryError,
        batch: Vec<Record>,
    },
}

/// What a flush request ended up doing.
#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    /// Nothing was buffered; no network call was made.
    Empty,
    /// Another flush was already running; this request was folded into it.
    Coalesced,
    Delivered(usize),
    /// Delivery failed and the batch went back to the front of the buffer.
    Requeued { count: usize, error: DeliveryError },
    /// Delivery failed terminally and the batch went to the dead-letter sink.
    DeadLettered { count: usize, error: DeliveryError },
}

/// Totals from the final shutdown flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct FinalFlush {
    pub delivered: usize,
    pub undelivered: usize,
}

/// Counters maintained by a [`FlushController`].
#[derive(Debug, Default)]
pub(crate) struct FlushCounters {
    pub delivered: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub dropped: AtomicU64,
    pub failed_flushes: AtomicU64,
}

/// Decides when a pipeline flushes and guarantees only one flush runs at a time.
pub struct FlushController {
    destination: String,
    buffer: Arc<Buffer>,
    sink: Arc<dyn Sink>,
    retrier: Retrier,
    headers: HashMap<String, String>,
    batch_size: usize,
    terminal_policy: TerminalErrorPolicy,
    /// Single permit: held for the whole snapshot-deliver-requeue cycle.
    in_flight_permit: Semaphore,
    flush_requested: Notify,
    /// Batch detached from the buffer and awaiting the sink.
    in_flight: Mutex<Option<Vec<Record>>>,
    pub(crate) counters: FlushCounters,
    observer: Arc<dyn PipelineObserver>,
    dead_letters: Arc<dyn DeadLetterSink>,
}

impl FlushController {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        destination: String,
        buffer: Arc<Buffer>,
        sink: Arc<dyn Sink>,
        retrier: Retrier,
        headers: HashMap<String, String>,
        batch_size: usize,
        terminal_policy: TerminalErrorPolicy,
        observer: Arc<dyn PipelineObserver>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Self {
            destination,
            buffer,
            sink,
            retrier,
            headers,
            batch_size,
            terminal_policy,
            in_flight_permit: Semaphore::new(1),
            flush_requested: Notify::new(),
            in_flight: Mutex::new(None),
            counters: FlushCounters::default(),
            observer,
            dead_letters,
        }
    }

    /// Ask the background worker to flush soon. Never blocks.
    pub fn request_flush(&self) {
        self.flush_requested.notify_one();
    }

    /// Whether the buffer has reached the size trigger.
    pub fn size_trigger_reached(&self) -> bool {
        self.buffer.len() >= self.batch_size
    }

    /// Number of records currently detached for delivery.
    pub fn in_flight_records(&self) -> usize {
        self.in_flight.lock().as_ref().map_or(0, Vec::len)
    }

    /// Take the batch currently awaiting the sink, if any.
    ///
    /// Used by shutdown once its deadline has cancelled the delivery.
    pub(crate) fn take_in_flight(&self) -> Vec<Record> {
        self.in_flight.lock().take().unwrap_or_default()
    }

    /// Report records evicted by the buffer cap.
    pub(crate) fn report_dropped(&self, dropped: usize) {
        if dropped > 0 {
            self.counters.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
            self.observer.on_records_dropped(&self.destination, dropped);
        }
    }

    /// Flush unless another flush is already running.
    pub async fn try_flush(&self) -> FlushOutcome {
        let Ok(_permit) = self.in_flight_permit.try_acquire() else {
            debug!(destination = %self.destination, "Flush already in flight, coalescing");
            return FlushOutcome::Coalesced;
        };
        self.run_cycle().await
    }

    /// Wait for any running flush, then deliver whatever is left and close
    /// the buffer to further appends.
    pub(crate) async fn flush_final(&self) -> FinalFlush {
        let _permit = self.in_flight_permit.acquire().await.ok();

        let batch = self.buffer.snapshot_and_close();
        if batch.is_empty() {
            return FinalFlush::default();
        }

        match self.deliver(batch).await {
            DeliveryOutcome::Delivered { count, attempts } => {
                self.counters.delivered.fetch_add(count as u64, Ordering::Relaxed);
                self.observer.on_flush_success(&self.destination, count, attempts);
                FinalFlush {
                    delivered: count,
                    undelivered: 0,
                }
            }
            DeliveryOutcome::Failed { error, batch } => {
                let count = batch.len();
                self.counters.failed_flushes.fetch_add(1, Ordering::Relaxed);
                self.observer.on_flush_failure(&self.destination, &error, count);
                // Buffer is closed; nothing can retry this batch any more.
                self.dead_letter(batch, &error);
                FinalFlush {
                    delivered: 0,
                    undelivered: count,
                }
            }
        }
    }

    /// One snapshot-deliver-resolve cycle.
    ///
    /// A requeued batch waits for the next trigger or tick even when it alone
    /// fills `batch_size`; only a successful flush requests an immediate
    /// follow-up. A failed batch that finds the buffer closed, or that a timed
    /// out shutdown already took over, ends up dead-lettered.
    async fn run_cycle(&self) -> FlushOutcome {
        let batch = self.buffer.snapshot_and_clear();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }
        let taken = batch.len();

        match self.deliver(batch).await {
            DeliveryOutcome::Delivered { count, attempts } => {
                self.counters.delivered.fetch_add(count as u64, Ordering::Relaxed);
                self.observer.on_flush_success(&self.destination, count, attempts);
                if self.size_trigger_reached() {
                    self.request_flush();
                }
                FlushOutcome::Delivered(count)
            }
            DeliveryOutcome::Failed { error, batch } => {
                let count = taken;
                self.counters.failed_flushes.fetch_add(1, Ordering::Relaxed);
                self.observer.on_flush_failure(&self.destination, &error, count);

                if batch.is_empty() {
                    // Shutdown deadline already handed the batch to the dead-letter sink
                    return FlushOutcome::DeadLettered { count, error };
                }

                if !error.is_retryable() && self.terminal_policy == TerminalErrorPolicy::DeadLetter {
                    self.dead_letter(batch, &error);
                    return FlushOutcome::DeadLettered { count, error };
                }

                match self.buffer.requeue(batch) {
                    Ok(evicted) => {
                        self.report_dropped(evicted.len());
                        FlushOutcome::Requeued { count, error }
                    }
                    Err(batch) => {
                        self.dead_letter(batch, &error);
                        FlushOutcome::DeadLettered { count, error }
                    }
                }
            }
        }
    }

    /// Transform and send a detached batch.
    ///
    /// While the sink is busy the batch is parked in `in_flight`, where a
    /// timed out shutdown can still reach it. A failure returns whatever is
    /// left there, which is empty if shutdown took it.
    async fn deliver(&self, batch: Vec<Record>) -> DeliveryOutcome {
        let count = batch.len();
        self.observer.on_flush_start(&self.destination, count);

        let payload = match self.sink.transform(&batch) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(destination = %self.destination, error = %e, "Transform failed");
                return DeliveryOutcome::Failed {
                    error: DeliveryError::Terminal {
                        reason: e.to_string(),
                        status_code: None,
                        attempts: 0,
                    },
                    batch,
                };
            }
        };

        *self.in_flight.lock() = Some(batch);
        let result = self
            .retrier
            .send(self.sink.as_ref(), &payload, &self.headers)
            .await;
        let batch = self.take_in_flight();

        match result {
            Ok(attempts) => DeliveryOutcome::Delivered { count, attempts },
            Err(error) => DeliveryOutcome::Failed { error, batch },
        }
    }

    /// Dead-letter whatever a timed-out shutdown left behind.
    pub(crate) fn abandon(&self, batch: Vec<Record>) {
        if batch.is_empty() {
            return;
        }
        let error = DeliveryError::Transient {
            reason: "shutdown deadline elapsed".to_string(),
            status_code: None,
            attempts: 0,
        };
        self.dead_letter(batch, &error);
    }

    fn dead_letter(&self, batch: Vec<Record>, error: &DeliveryError) {
        let count = batch.len();
        if count == 0 {
            return;
        }
        self.counters.dead_lettered.fetch_add(count as u64, Ordering::Relaxed);
        self.dead_letters.accept(&self.destination, batch, error);
        self.observer.on_dead_letter(&self.destination, count);
    }
}

/// Spawn the per-pipeline task that flushes on every tick and on size
/// triggers until `shutdown` fires or its sender is dropped.
pub(crate) fn spawn_flush_worker(
    controller: Arc<FlushController>,
    flush_interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + flush_interval, flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    controller.try_flush().await;
                }
                _ = controller.flush_requested.notified() => {
                    controller.try_flush().await;
                }
            }
        }

        debug!(destination = %controller.destination, "Flush worker stopped");
    })
}
