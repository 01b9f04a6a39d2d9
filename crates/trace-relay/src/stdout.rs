//! Sink that prints transformed batches, for local runs.

use async_trait::async_trait;
use delivery_pipeline::{Payload, Record, Sink, SinkError, SinkResponse};
use http_sink::TransformFn;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

type Output = Box<dyn AsyncWrite + Send + Unpin>;

/// Writes each payload body followed by a newline. Always answers 200.
pub struct StdoutSink {
    name: String,
    transform: TransformFn,
    output: Mutex<Output>,
}

impl StdoutSink {
    pub fn new(name: impl Into<String>, transform: TransformFn) -> Self {
        Self::with_writer(name, transform, tokio::io::stdout())
    }

    /// Write somewhere other than stdout.
    pub fn with_writer(
        name: impl Into<String>,
        transform: TransformFn,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            transform,
            output: Mutex::new(Box::new(writer)),
        }
    }
}

#[async_trait]
impl Sink for StdoutSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, batch: &[Record]) -> Result<Payload, SinkError> {
        (self.transform)(batch)
    }

    async fn deliver(
        &self,
        payload: &Payload,
        _headers: &HashMap<String, String>,
        _timeout: Duration,
    ) -> Result<SinkResponse, SinkError> {
        let mut output = self.output.lock().await;
        let io = |e: std::io::Error| SinkError::Transport(e.to_string());

        output.write_all(&payload.body).await.map_err(io)?;
        if !payload.body.ends_with(b"\n") {
            output.write_all(b"\n").await.map_err(io)?;
        }
        output.flush().await.map_err(io)?;
        Ok(SinkResponse::ok())
    }
}
