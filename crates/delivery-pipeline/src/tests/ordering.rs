//! Ordering guarantees.

use super::harness::{config, ids, payload, MockSink, Reply};
use crate::{DeliveryPipeline, FlushOutcome};
use std::sync::Arc;

#[tokio::test]
async fn failed_batch_is_delivered_ahead_of_newer_records() {
    let sink = Arc::new(MockSink::new());
    sink.script([Reply::Status(503)]);
    let pipeline = DeliveryPipeline::new(config(100), sink.clone()).unwrap();

    for id in ["a", "b", "c"] {
        pipeline.enqueue(payload(id)).unwrap();
    }
    match pipeline.flush().await {
        FlushOutcome::Requeued { count, error } => {
            assert_eq!(count, 3);
            assert!(error.is_retryable());
        }
        other => panic!("expected requeue, got {other:?}"),
    }
    assert_eq!(pipeline.buffered_len(), 3);

    pipeline.enqueue(payload("d")).unwrap();
    pipeline.enqueue(payload("e")).unwrap();

    assert_eq!(pipeline.flush().await, FlushOutcome::Delivered(5));
    assert_eq!(sink.delivered_ids(), ids(&["a", "b", "c", "d", "e"]));
    assert_eq!(sink.delivered_batches().len(), 1);
    assert_eq!(pipeline.buffered_len(), 0);
}

#[tokio::test]
async fn order_survives_repeated_failures() {
    let sink = Arc::new(MockSink::new());
    sink.script([Reply::Status(500), Reply::Status(502), Reply::Status(503)]);
    let pipeline = DeliveryPipeline::new(config(100), sink.clone()).unwrap();

    let mut expected = Vec::new();
    for round in 0..4 {
        for i in 0..3 {
            let id = format!("r{round}-{i}");
            pipeline.enqueue(payload(&id)).unwrap();
            expected.push(id);
        }
        pipeline.flush().await;
    }

    assert_eq!(sink.attempt_count(), 4);
    assert_eq!(sink.delivered_ids(), expected);
}

#[tokio::test]
async fn sequence_numbers_follow_enqueue_order() {
    let sink = Arc::new(MockSink::new());
    let pipeline = DeliveryPipeline::new(config(100), sink).unwrap();

    let sequences: Vec<u64> = (0..5)
        .map(|i| pipeline.enqueue(payload(&format!("s{i}"))).unwrap())
        .collect();
    assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn buffer_cap_evicts_oldest_first() {
    let sink = Arc::new(MockSink::new());
    let pipeline =
        DeliveryPipeline::new(config(3).with_max_buffered_records(3), sink.clone()).unwrap();

    // The worker cannot run between these calls on a current-thread runtime.
    for id in ["a", "b", "c", "d", "e"] {
        pipeline.enqueue(payload(id)).unwrap();
    }

    let stats = pipeline.stats();
    assert_eq!(stats.dropped, 2);
    assert_eq!(stats.buffered, 3);

    assert_eq!(pipeline.flush().await, FlushOutcome::Delivered(3));
    assert_eq!(sink.delivered_ids(), ids(&["c", "d", "e"]));
}
