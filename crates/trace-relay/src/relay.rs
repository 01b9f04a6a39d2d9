//! Fan-out of incoming trace records to every configured pipeline.

use crate::config::{process_env, RelayConfig};
use crate::error::RelayResult;
use crate::SinkFactories;
use delivery_pipeline::{DeliveryPipeline, PipelineError, ShutdownReport, TracePayload};
use futures_util::future::join_all;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

/// Counters for one ingest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Non-blank lines read.
    pub lines: u64,
    /// Records accepted by at least one pipeline.
    pub accepted: u64,
    /// Lines that were not a valid JSON trace payload.
    pub malformed: u64,
    /// Payloads that failed validation.
    pub rejected: u64,
}

/// Final state of one pipeline after [`Relay::shutdown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationSummary {
    pub destination: String,
    /// `None` if the pipeline had already been shut down.
    pub report: Option<ShutdownReport>,
}

/// A set of running pipelines fed from one input.
#[derive(Debug)]
pub struct Relay {
    pipelines: Vec<DeliveryPipeline>,
}

impl Relay {
    /// Start one pipeline per destination. Must be called inside a Tokio runtime.
    pub fn from_config(config: &RelayConfig, factories: &SinkFactories) -> RelayResult<Self> {
        let mut pipelines = Vec::with_capacity(config.destinations.len());

        for spec in &config.destinations {
            let destination = spec.to_destination_config(&process_env)?;
            let sink = factories.build(spec)?;
            info!(
                destination = %spec.name,
                kind = %spec.kind,
                transform = %spec.transform,
                "Destination configured"
            );
            pipelines.push(DeliveryPipeline::new(destination, sink)?);
        }

        Ok(Self::from_pipelines(pipelines))
    }

    pub fn from_pipelines(pipelines: Vec<DeliveryPipeline>) -> Self {
        Self { pipelines }
    }

    pub fn pipelines(&self) -> &[DeliveryPipeline] {
        &self.pipelines
    }

    /// Enqueue `payload` on every pipeline.
    ///
    /// Returns how many pipelines accepted it. Invalid payloads are rejected
    /// before any pipeline sees them.
    pub fn fan_out(&self, payload: TracePayload) -> Result<usize, PipelineError> {
        payload.validate()?;

        let mut accepted = 0;
        for pipeline in &self.pipelines {
            match pipeline.enqueue(payload.clone()) {
                Ok(_) => accepted += 1,
                Err(e) => warn!(destination = %pipeline.name(), error = %e, "Enqueue failed"),
            }
        }
        Ok(accepted)
    }

    /// Read NDJSON trace payloads until EOF, fanning each one out.
    ///
    /// Bad lines are logged and counted; only read errors end the run early.
    pub async fn ingest<R>(&self, input: R, stats: &mut IngestStats) -> RelayResult<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut line_number = 0u64;

        while let Some(line) = lines.next_line().await? {
            line_number += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            stats.lines += 1;

            let payload: TracePayload = match serde_json::from_str(line) {
                Ok(payload) => payload,
                Err(e) => {
                    stats.malformed += 1;
                    warn!(line = line_number, error = %e, "Skipping malformed line");
                    continue;
                }
            };

            match self.fan_out(payload) {
                Ok(0) => {}
                Ok(_) => stats.accepted += 1,
                Err(e) => {
                    stats.rejected += 1;
                    warn!(line = line_number, error = %e, "Rejected record");
                }
            }
        }

        debug!(lines = line_number, "Input exhausted");
        Ok(())
    }

    /// Shut every pipeline down concurrently.
    pub async fn shutdown(&self) -> Vec<DestinationSummary> {
        let reports = join_all(self.pipelines.iter().map(|p| p.shutdown())).await;

        self.pipelines
            .iter()
            .zip(reports)
            .map(|(pipeline, report)| DestinationSummary {
                destination: pipeline.name().to_string(),
                report,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use delivery_pipeline::{
        DestinationConfig, Payload, Record, Sink, SinkError, SinkResponse,
    };
    use http_sink::TransformRegistry;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    /// Sink that remembers every delivered record id.
    #[derive(Default)]
    struct RecordingSink {
        name: String,
        delivered: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn named(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                ..Default::default()
            })
        }

        fn delivered(&self) -> Vec<String> {
            self.delivered.lock().clone()
        }
    }

    #[async_trait]
    impl Sink for RecordingSink {
        fn name(&self) -> &str {
            &self.name
        }

        fn transform(&self, batch: &[Record]) -> Result<Payload, SinkError> {
            let ids: Vec<&str> = batch.iter().map(|r| r.id()).collect();
            Payload::json(&ids)
        }

        async fn deliver(
            &self,
            payload: &Payload,
            _headers: &HashMap<String, String>,
            _timeout: Duration,
        ) -> Result<SinkResponse, SinkError> {
            let ids: Vec<String> = serde_json::from_slice(&payload.body).unwrap();
            self.delivered.lock().extend(ids);
            Ok(SinkResponse::ok())
        }
    }

    fn pipeline(name: &str, sink: Arc<RecordingSink>) -> DeliveryPipeline {
        let config = DestinationConfig::new(name)
            .with_batch_size(100)
            .with_flush_interval(Duration::from_secs(3600));
        DeliveryPipeline::new(config, sink).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_fans_out_and_counts() {
        let first = RecordingSink::named("first");
        let second = RecordingSink::named("second");
        let relay = Relay::from_pipelines(vec![
            pipeline("first", first.clone()),
            pipeline("second", second.clone()),
        ]);

        let input = concat!(
            r#"{"id": "a", "name": "llm.call"}"#,
            "\n",
            "\n",
            "not json\n",
            r#"{"id": " ", "name": "blank id"}"#,
            "\n",
            r#"{"id": "b", "name": "tool.call", "attributes": {"tool": "search"}}"#,
            "\n",
        );

        let mut stats = IngestStats::default();
        relay.ingest(input.as_bytes(), &mut stats).await.unwrap();
        assert_eq!(
            stats,
            IngestStats {
                lines: 4,
                accepted: 2,
                malformed: 1,
                rejected: 1
            }
        );

        let summaries = relay.shutdown().await;
        assert_eq!(summaries.len(), 2);
        for summary in &summaries {
            let report = summary.report.unwrap();
            assert_eq!(report.delivered, 2);
            assert_eq!(report.undelivered, 0);
        }

        assert_eq!(first.delivered(), vec!["a", "b"]);
        assert_eq!(second.delivered(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_fan_out_after_shutdown_accepts_nothing() {
        let sink = RecordingSink::named("only");
        let relay = Relay::from_pipelines(vec![pipeline("only", sink)]);
        relay.shutdown().await;

        let accepted = relay.fan_out(TracePayload::new("late", "llm.call")).unwrap();
        assert_eq!(accepted, 0);

        let second = relay.shutdown().await;
        assert!(second[0].report.is_none());
    }

    #[tokio::test]
    async fn test_from_config_uses_supplied_factories() {
        let sink = RecordingSink::named("memory");
        let mut factories = SinkFactories::new(TransformRegistry::with_builtins());
        let shared = sink.clone();
        factories.register("memory", move |_spec, _transforms| Ok(shared.clone() as Arc<dyn Sink>));

        let config = RelayConfig::from_json(
            r#"{"destinations": [{"name": "mem", "kind": "memory", "batchSize": 1}]}"#,
        )
        .unwrap();
        let relay = Relay::from_config(&config, &factories).unwrap();
        assert_eq!(relay.pipelines()[0].name(), "mem");
        assert_eq!(relay.pipelines()[0].config().batch_size, 1);

        relay.fan_out(TracePayload::new("x", "llm.call")).unwrap();
        relay.shutdown().await;
        assert_eq!(sink.delivered(), vec!["x"]);
    }

    #[tokio::test]
    async fn test_from_config_rejects_unknown_kind() {
        let factories = SinkFactories::new(TransformRegistry::with_builtins());
        let config =
            RelayConfig::from_json(r#"{"destinations": [{"name": "a", "kind": "kafka"}]}"#).unwrap();

        let err = Relay::from_config(&config, &factories).unwrap_err();
        assert!(err.to_string().contains("Unknown sink kind 'kafka'"));
    }
}
