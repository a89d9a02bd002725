//! Transport to the dispatcher that produces the event stream.

use async_trait::async_trait;
use bytes::Bytes;
use chorus_core::config::ChorusConfig;
use chorus_core::dispatch::DispatchRequest;
use chorus_core::{ChorusError, Result};
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;

const EVENT_STREAM_MIME: &str = "text/event-stream";
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Raw response body chunks as they arrive.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Decoded frame payloads (see [`crate::frame::decode_frames`]).
pub type FrameStream = BoxStream<'static, Result<Value>>;

/// Opens event streams against the dispatcher.
///
/// Implemented over HTTP by [`HttpEventTransport`]; tests substitute
/// in-memory streams.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Sends `request` and returns the response body as a byte stream.
    ///
    /// # Errors
    ///
    /// Returns `ChorusError::Transport` when the connection cannot be made
    /// or the dispatcher answers with a non-success status.
    async fn open(&self, request: &DispatchRequest) -> Result<ByteStream>;
}

/// [`EventTransport`] that POSTs the request as JSON and streams the body.
#[derive(Clone)]
pub struct HttpEventTransport {
    client: Client,
    endpoint: String,
}

impl HttpEventTransport {
    /// Creates a transport from configuration.
    ///
    /// Only the connect phase is bounded; the body may stay open as long
    /// as the dispatcher keeps it open.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the HTTP client cannot be built.
    pub fn from_config(config: &ChorusConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|err| ChorusError::config(format!("Failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl EventTransport for HttpEventTransport {
    async fn open(&self, request: &DispatchRequest) -> Result<ByteStream> {
        tracing::debug!(
            "[HttpTransport] POST {} ({} mode, {} models)",
            self.endpoint,
            request.mode,
            request.models.len()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, EVENT_STREAM_MIME)
            .header(CONTENT_TYPE, "application/json")
            .json(request)
            .send()
            .await
            .map_err(|err| ChorusError::transport(format!("Dispatcher request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read dispatcher error body".to_string());
            return Err(ChorusError::http_status(
                status.as_u16(),
                truncate(body.trim(), MAX_ERROR_BODY_CHARS),
            ));
        }

        let body = response.bytes_stream().map(|chunk| {
            chunk.map_err(|err| ChorusError::transport(format!("Stream read failed: {err}")))
        });
        Ok(Box::pin(body))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
