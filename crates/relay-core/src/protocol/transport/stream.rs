//! Remote-stream transport
//!
//! Receives messages over a persistent Server-Sent Events stream and sends
//! requests via HTTP POST to the same endpoint. The listener task owns the
//! channel sender; when the stream dies the channel closes and the session
//! is considered lost.

use super::Transport;
use crate::protocol::error::WireError;
use crate::protocol::wire::WireMessage;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Remote-stream transport configuration
#[derive(Debug, Clone)]
pub struct StreamTransportConfig {
    /// Endpoint URL
    pub endpoint: String,
    /// Headers sent on every request (already resolved)
    pub headers: HashMap<String, String>,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl StreamTransportConfig {
    /// Create a config for an endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            headers: HashMap::new(),
            request_timeout: Duration::from_secs(60),
        }
    }

    /// Replace the header map
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Add one header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// HTTP transport: SSE downstream, POST upstream
pub struct StreamTransport {
    client: Client,
    endpoint: String,
    connected: Arc<AtomicBool>,
    message_rx: Option<mpsc::Receiver<WireMessage>>,
    /// Handed to the listener task by `connect`; dropping it there closes
    /// the channel and signals connection loss.
    message_tx: Option<mpsc::Sender<WireMessage>>,
    listener_handle: Option<tokio::task::JoinHandle<()>>,
}

impl StreamTransport {
    /// Create the transport; call [`connect`](Self::connect) to start the
    /// event stream.
    pub fn new(config: StreamTransportConfig) -> Result<Self, WireError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json, text/event-stream"),
        );
        for (key, value) in &config.headers {
            if let (Ok(name), Ok(val)) = (
                reqwest::header::HeaderName::try_from(key),
                reqwest::header::HeaderValue::try_from(value),
            ) {
                headers.insert(name, val);
            } else {
                warn!(header = %key, "skipping invalid header value");
            }
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| WireError::connection(format!("failed to build HTTP client: {}", e)))?;

        let (message_tx, message_rx) = mpsc::channel(100);

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            connected: Arc::new(AtomicBool::new(true)),
            message_rx: Some(message_rx),
            message_tx: Some(message_tx),
            listener_handle: None,
        })
    }

    /// Open the event stream and start the listener task
    pub async fn connect(&mut self) -> Result<(), WireError> {
        let message_tx = self
            .message_tx
            .take()
            .ok_or_else(|| WireError::connection("transport already connected"))?;

        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let connected = Arc::clone(&self.connected);

        let handle = tokio::spawn(async move {
            if let Err(e) = event_listener(client, &endpoint, &connected, message_tx).await {
                error!(error = %e, "event stream listener failed");
            }
            connected.store(false, Ordering::SeqCst);
        });

        self.listener_handle = Some(handle);
        debug!(endpoint = %self.endpoint, "remote stream transport connected");
        Ok(())
    }
}

/// Listener task: consume SSE events and forward parsed messages. Returns
/// (dropping the channel sender) when the stream ends or errors.
async fn event_listener(
    client: Client,
    endpoint: &str,
    connected: &AtomicBool,
    message_tx: mpsc::Sender<WireMessage>,
) -> Result<(), WireError> {
    let response = client
        .get(endpoint)
        .header("Accept", "text/event-stream")
        .send()
        .await
        .map_err(|e| WireError::connection(format!("event stream connect failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(WireError::connection(format!(
            "event stream rejected with status {}",
            response.status()
        )));
    }

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while connected.load(Ordering::SeqCst) {
        match stream.next().await {
            Some(Ok(chunk)) => {
                if let Ok(text) = String::from_utf8(chunk.to_vec()) {
                    buffer.push_str(&text);

                    while let Some(event_end) = buffer.find("\n\n") {
                        let event = buffer[..event_end].to_string();
                        buffer = buffer[event_end + 2..].to_string();

                        if let Some(message) = parse_sse_event(&event) {
                            if message_tx.send(message).await.is_err() {
                                debug!("message channel closed, stopping listener");
                                return Ok(());
                            }
                        }
                    }
                }
            }
            Some(Err(e)) => {
                error!(error = %e, "event stream read error");
                break;
            }
            None => {
                debug!("event stream ended");
                break;
            }
        }
    }

    Ok(())
}

#[async_trait]
impl Transport for StreamTransport {
    async fn send(&mut self, message: WireMessage) -> Result<(), WireError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(WireError::connection("not connected"));
        }

        let json = serde_json::to_string(&message)?;
        let response = self
            .client
            .post(&self.endpoint)
            .body(json)
            .send()
            .await
            .map_err(|e| WireError::connection(format!("send failed: {}", e)))?;

        match response.status() {
            StatusCode::OK | StatusCode::ACCEPTED | StatusCode::NO_CONTENT => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(WireError::server(
                    status.as_u16() as i32,
                    format!("HTTP {}: {}", status, body),
                ))
            }
        }
    }

    fn take_receiver(&mut self) -> Option<mpsc::Receiver<WireMessage>> {
        self.message_rx.take()
    }

    async fn close(&mut self) -> Result<(), WireError> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = self.listener_handle.take() {
            handle.abort();
        }
        debug!(endpoint = %self.endpoint, "remote stream transport closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = self.listener_handle.take() {
            handle.abort();
        }
    }
}

/// Extract the JSON-RPC message from one SSE event block
fn parse_sse_event(event: &str) -> Option<WireMessage> {
    let mut data = String::new();
    for line in event.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data.push_str(value.trim());
        }
    }

    if data.is_empty() {
        return None;
    }

    match serde_json::from_str::<WireMessage>(&data) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(error = %e, data = %data, "dropping unparseable event");
            None
        }
    }
}
