//! Batch transforms: pure mappings from buffered records to a wire payload.

use crate::{HttpSinkError, HttpSinkResult};
use chrono::{DateTime, Utc};
use delivery_pipeline::{Payload, Record, SinkError, TracePayload};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// A named batch transform.
pub type TransformFn = Arc<dyn Fn(&[Record]) -> Result<Payload, SinkError> + Send + Sync>;

/// Transforms available to destinations, looked up by name.
///
/// Built explicitly and passed to whoever constructs sinks.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, TransformFn>,
}

impl TransformRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `json`, `ndjson` and `envelope`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("json", json_array);
        registry.register("ndjson", ndjson);
        registry.register("envelope", envelope);
        registry
    }

    /// Add or replace a transform.
    pub fn register<F>(&mut self, name: impl Into<String>, transform: F)
    where
        F: Fn(&[Record]) -> Result<Payload, SinkError> + Send + Sync + 'static,
    {
        self.transforms.insert(name.into(), Arc::new(transform));
    }

    pub fn get(&self, name: &str) -> HttpSinkResult<TransformFn> {
        self.transforms
            .get(name)
            .cloned()
            .ok_or_else(|| HttpSinkError::UnknownTransform {
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.transforms.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("transforms", &self.names())
            .finish()
    }
}

/// JSON array of payloads.
pub fn json_array(batch: &[Record]) -> Result<Payload, SinkError> {
    let payloads: Vec<&TracePayload> = batch.iter().map(|r| &r.payload).collect();
    Payload::json(&payloads)
}

/// One JSON payload per line.
pub fn ndjson(batch: &[Record]) -> Result<Payload, SinkError> {
    let mut body = Vec::new();
    for record in batch {
        serde_json::to_writer(&mut body, &record.payload)
            .map_err(|e| SinkError::Transform(e.to_string()))?;
        body.push(b'\n');
    }
    Ok(Payload::new(body, "application/x-ndjson"))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeItem<'a> {
    #[serde(flatten)]
    payload: &'a TracePayload,
    enqueued_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a> {
    batch: Vec<EnvelopeItem<'a>>,
    sent_at: DateTime<Utc>,
    count: usize,
}

/// `{"batch": [...], "sentAt": ..., "count": n}`, each item carrying `enqueuedAt`.
pub fn envelope(batch: &[Record]) -> Result<Payload, SinkError> {
    let envelope = Envelope {
        batch: batch
            .iter()
            .map(|r| EnvelopeItem {
                payload: &r.payload,
                enqueued_at: r.enqueued_at,
            })
            .collect(),
        sent_at: Utc::now(),
        count: batch.len(),
    };
    Payload::json(&envelope)
}
