//! Trace records accepted by a pipeline.

use crate::{PipelineError, PipelineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Completion status of a traced operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "camelCase")]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// A timestamped event recorded inside a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// Vendor-agnostic trace payload submitted by the SDK.
///
/// The pipeline treats everything except `id` as opaque; sinks decide how
/// the fields map onto their wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracePayload {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub status: SpanStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SpanEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<TracePayload>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl TracePayload {
    /// Create a payload with the given id and name and everything else empty.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            trace_id: None,
            parent_id: None,
            name: name.into(),
            start_time: None,
            end_time: None,
            duration_ms: None,
            status: SpanStatus::Unset,
            events: Vec::new(),
            spans: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Set a free-form attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Attach a nested child span.
    pub fn with_span(mut self, span: TracePayload) -> Self {
        self.spans.push(span);
        self
    }

    /// Structural validation performed before a payload is buffered.
    ///
    /// Every payload, including nested child spans, must carry a non-blank id.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.id.trim().is_empty() {
            return Err(PipelineError::InvalidRecord(format!(
                "record '{}' is missing an id",
                self.name
            )));
        }

        for child in &self.spans {
            child.validate().map_err(|e| match e {
                PipelineError::InvalidRecord(reason) => PipelineError::InvalidRecord(format!(
                    "child of '{}': {}",
                    self.id, reason
                )),
                other => other,
            })?;
        }

        Ok(())
    }
}

/// A payload once it has been accepted into a pipeline's buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Per-pipeline enqueue order, starting at 0.
    pub sequence: u64,
    /// When the record was buffered.
    pub enqueued_at: DateTime<Utc>,
    pub payload: TracePayload,
}

impl Record {
    pub fn new(sequence: u64, payload: TracePayload) -> Self {
        Self {
            sequence,
            enqueued_at: Utc::now(),
            payload,
        }
    }

    /// The payload id.
    pub fn id(&self) -> &str {
        &self.payload.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_rejects_blank_id() {
        let payload = TracePayload::new("  ", "chat");
        assert!(matches!(
            payload.validate(),
            Err(PipelineError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_validate_rejects_nested_blank_id() {
        let payload = TracePayload::new("root", "workflow").with_span(TracePayload::new("", "tool"));
        let err = payload.validate().unwrap_err();
        assert!(err.to_string().contains("child of 'root'"));
    }

    #[test]
    fn test_validate_accepts_minimal_payload() {
        assert!(TracePayload::new("span-1", "chat").validate().is_ok());
    }

    #[test]
    fn test_deserialize_minimal_json() {
        let payload: TracePayload =
            serde_json::from_value(json!({"id": "span-1", "name": "chat gpt-4o"})).unwrap();
        assert_eq!(payload.id, "span-1");
        assert_eq!(payload.status, SpanStatus::Unset);
        assert!(payload.spans.is_empty());
    }

    #[test]
    fn test_deserialize_full_json() {
        let payload: TracePayload = serde_json::from_value(json!({
            "id": "span-1",
            "traceId": "trace-1",
            "name": "chat",
            "startTime": "2025-01-01T00:00:00Z",
            "durationMs": 1200,
            "status": {"code": "error", "message": "rate limited"},
            "events": [{"name": "retry", "timestamp": "2025-01-01T00:00:01Z"}],
            "spans": [{"id": "span-2", "name": "tool"}],
            "attributes": {"llm.model": "gpt-4o", "llm.total_tokens": 42}
        }))
        .unwrap();

        assert_eq!(payload.trace_id.as_deref(), Some("trace-1"));
        assert_eq!(payload.duration_ms, Some(1200));
        assert_eq!(
            payload.status,
            SpanStatus::Error {
                message: Some("rate limited".to_string())
            }
        );
        assert_eq!(payload.events.len(), 1);
        assert_eq!(payload.spans[0].id, "span-2");
        assert_eq!(payload.attributes["llm.total_tokens"], json!(42));
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = Record::new(7, TracePayload::new("span-1", "chat"));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["sequence"], json!(7));
        assert!(value.get("enqueuedAt").is_some());
        assert_eq!(value["payload"]["id"], json!("span-1"));
    }
}
