//! Scenario tests for the delivery pipeline.
//!
//! - `harness.rs`       - MockSink with scripted replies and attempt recording
//! - `ordering.rs`      - FIFO delivery across failures, requeue and eviction
//! - `single_flight.rs` - At most one delivery in flight per pipeline
//! - `triggers.rs`      - Size and time flush triggers
//! - `retry.rs`         - Retry exhaustion, terminal errors, dead-lettering
//! - `shutdown.rs`      - Draining, idempotency and the shutdown deadline

mod ordering;
