//! Generic HTTP sink.

use crate::{HttpSinkError, HttpSinkResult, TransformFn, TransformRegistry};
use async_trait::async_trait;
use delivery_pipeline::{Payload, Record, Sink, SinkError, SinkResponse};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// `User-Agent` sent with every request.
pub const USER_AGENT: &str = concat!("trace-relay/", env!("CARGO_PKG_VERSION"));

/// Longest response body excerpt kept in debug logs.
const MAX_BODY_EXCERPT: usize = 512;

/// POSTs each transformed batch to a fixed endpoint.
///
/// Timeouts and retries are driven by the pipeline; one `deliver` call is
/// exactly one HTTP request.
pub struct HttpSink {
    name: String,
    endpoint: Url,
    client: Client,
    transform: TransformFn,
}

impl HttpSink {
    /// Create a sink with its own HTTP client.
    pub fn new(name: impl Into<String>, endpoint: &str, transform: TransformFn) -> HttpSinkResult<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Self::with_client(name, endpoint, transform, client)
    }

    /// Create a sink sharing an existing client.
    pub fn with_client(
        name: impl Into<String>,
        endpoint: &str,
        transform: TransformFn,
        client: Client,
    ) -> HttpSinkResult<Self> {
        Ok(Self {
            name: name.into(),
            endpoint: parse_endpoint(endpoint)?,
            client,
            transform,
        })
    }

    /// Create a sink whose transform is looked up by name.
    pub fn from_registry(
        name: impl Into<String>,
        endpoint: &str,
        registry: &TransformRegistry,
        transform: &str,
    ) -> HttpSinkResult<Self> {
        Self::new(name, endpoint, registry.get(transform)?)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn parse_endpoint(endpoint: &str) -> HttpSinkResult<Url> {
    let invalid = |reason: String| HttpSinkError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };

    let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme '{other}'"))),
    }
}

#[async_trait]
impl Sink for HttpSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, batch: &[Record]) -> Result<Payload, SinkError> {
        (self.transform)(batch)
    }

    async fn deliver(
        &self,
        payload: &Payload,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<SinkResponse, SinkError> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .timeout(timeout)
            .header(CONTENT_TYPE, payload.content_type.as_str())
            .body(payload.body.clone());
        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }

        debug!(
            sink = %self.name,
            endpoint = %self.endpoint,
            bytes = payload.body.len(),
            "Sending batch"
        );

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SinkError::Timeout
            } else if e.is_builder() {
                // Malformed header names or values never succeed
                SinkError::Rejected(e.to_string())
            } else {
                SinkError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(MAX_BODY_EXCERPT).collect();
            debug!(
                sink = %self.name,
                status = status.as_u16(),
                body = %excerpt,
                "Endpoint returned non-success status"
            );
        }

        Ok(SinkResponse::new(status.as_u16()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delivery_pipeline::TracePayload;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// A request captured by the test server.
    #[derive(Debug, Clone)]
    struct Captured {
        head: String,
        body: Vec<u8>,
    }

    impl Captured {
        fn header(&self, name: &str) -> Option<String> {
            let prefix = format!("{}:", name.to_ascii_lowercase());
            self.head
                .lines()
                .find(|line| line.to_ascii_lowercase().starts_with(&prefix))
                .map(|line| line[prefix.len()..].trim().to_string())
        }
    }

    /// Minimal HTTP/1.1 server answering each connection with the next status.
    struct TestServer {
        url: String,
        requests: Arc<Mutex<Vec<Captured>>>,
    }

    impl TestServer {
        async fn start(status: u16) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}/ingest", listener.local_addr().unwrap());
            let requests = Arc::new(Mutex::new(Vec::new()));

            let captured = requests.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    if let Some(request) = read_request(stream, status).await {
                        captured.lock().push(request);
                    }
                }
            });

            Self { url, requests }
        }

        fn requests(&self) -> Vec<Captured> {
            self.requests.lock().clone()
        }
    }

    async fn read_request(mut stream: TcpStream, status: u16) -> Option<Captured> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        let head_end = loop {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
        let length = head
            .lines()
            .find_map(|line| {
                let lower = line.to_ascii_lowercase();
                lower
                    .strip_prefix("content-length:")
                    .map(|v| v.trim().parse::<usize>().unwrap_or(0))
            })
            .unwrap_or(0);

        while buf.len() < head_end + length {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        let response = format!(
            "HTTP/1.1 {status} Test\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok"
        );
        stream.write_all(response.as_bytes()).await.ok()?;
        stream.shutdown().await.ok();

        Some(Captured {
            head,
            body: buf[head_end..].to_vec(),
        })
    }

    fn sink(url: &str) -> HttpSink {
        HttpSink::from_registry("test", url, &TransformRegistry::with_builtins(), "json").unwrap()
    }

    fn payload() -> Payload {
        let batch = vec![Record::new(0, TracePayload::new("span-1", "llm.call"))];
        sink("http://localhost/").transform(&batch).unwrap()
    }

    #[tokio::test]
    async fn test_posts_body_and_headers() {
        let server = TestServer::start(200).await;
        let sink = sink(&server.url);
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer secret".to_string());
        headers.insert("X-Project".to_string(), "demo".to_string());

        let response = sink
            .deliver(&payload(), &headers, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(response.status_code, 200);

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert!(request.head.starts_with("POST /ingest HTTP/1.1"));
        assert_eq!(request.header("authorization").as_deref(), Some("Bearer secret"));
        assert_eq!(request.header("x-project").as_deref(), Some("demo"));
        assert_eq!(request.header("content-type").as_deref(), Some("application/json"));
        assert_eq!(request.header("user-agent").as_deref(), Some(USER_AGENT));

        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(body[0]["id"], "span-1");
    }

    #[tokio::test]
    async fn test_error_status_is_returned_not_raised() {
        for status in [400u16, 429, 503] {
            let server = TestServer::start(status).await;
            let response = sink(&server.url)
                .deliver(&payload(), &HashMap::new(), Duration::from_secs(5))
                .await
                .unwrap();
            assert_eq!(response.status_code, status);
            assert!(!response.is_success());
        }
    }

    #[tokio::test]
    async fn test_unresponsive_endpoint_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/ingest", listener.local_addr().unwrap());
        // Accept and hold connections without answering
        let _holder = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let err = sink(&url)
            .deliver(&payload(), &HashMap::new(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err, SinkError::Timeout);
    }

    #[tokio::test]
    async fn test_refused_connection_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/ingest", listener.local_addr().unwrap());
        drop(listener);

        let err = sink(&url)
            .deliver(&payload(), &HashMap::new(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Transport(_)));
    }

    #[tokio::test]
    async fn test_invalid_header_is_rejected() {
        let server = TestServer::start(200).await;
        let mut headers = HashMap::new();
        headers.insert("Bad Header".to_string(), "value".to_string());

        let err = sink(&server.url)
            .deliver(&payload(), &headers, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Rejected(_)));
        assert!(server.requests().is_empty());
    }

    #[test]
    fn test_endpoint_validation() {
        let registry = TransformRegistry::with_builtins();
        assert!(HttpSink::from_registry("a", "https://example.test/v1/traces", &registry, "json").is_ok());

        let err = HttpSink::from_registry("a", "not a url", &registry, "json").err().unwrap();
        assert!(matches!(err, HttpSinkError::InvalidEndpoint { .. }));

        let err = HttpSink::from_registry("a", "ftp://example.test", &registry, "json").err().unwrap();
        assert!(err.to_string().contains("unsupported scheme 'ftp'"));

        let err = HttpSink::from_registry("a", "https://example.test", &registry, "xml").err().unwrap();
        assert!(matches!(err, HttpSinkError::UnknownTransform { .. }));
    }
}
