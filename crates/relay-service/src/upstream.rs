//! HTTP upstream client (C3): per-provider timeouts, bounded retries before
//! the first byte, and a raw streaming read used by the pipeline (C10).

use std::collections::HashMap;
use std::time::Duration;

use futures::{Stream, StreamExt};
use relay_core::error::StreamErrorKind;
use reqwest::Client;

#[derive(Debug, Clone)]
pub struct UpstreamRequestConfig {
    pub total_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for UpstreamRequestConfig {
    fn default() -> Self {
        UpstreamRequestConfig {
            total_timeout: Duration::from_secs(120),
            max_retries: 2,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

#[derive(Debug)]
pub enum UpstreamError {
    Timeout,
    Connect(String),
    Other(String),
}

impl UpstreamError {
    fn is_retryable_before_first_byte(&self) -> bool {
        matches!(self, UpstreamError::Connect(_) | UpstreamError::Timeout)
    }

    pub fn kind(&self) -> StreamErrorKind {
        match self {
            UpstreamError::Timeout => StreamErrorKind::TimeoutError,
            UpstreamError::Connect(_) => StreamErrorKind::ConnectError,
            UpstreamError::Other(_) => StreamErrorKind::Unknown,
        }
    }
}

pub struct UpstreamResponse {
    pub status: u16,
    pub body_stream: std::pin::Pin<Box<dyn Stream<Item = Result<bytes::Bytes, StreamErrorKind>> + Send>>,
}

#[derive(Clone)]
pub struct UpstreamClient {
    http: Client,
}

impl UpstreamClient {
    pub fn new() -> Self {
        UpstreamClient {
            http: Client::builder()
                .build()
                .expect("reqwest client builds with default TLS backend"),
        }
    }

    /// Sends the request, retrying up to `max_retries` times on
    /// transport-level connect/timeout errors — but only before any
    /// response has been obtained; once headers/bytes are back, the caller
    /// owns error handling for the remainder of the stream.
    pub async fn send(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: Vec<u8>,
        cfg: &UpstreamRequestConfig,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let mut attempt = 0;
        loop {
            match self.try_once(method, url, headers, body.clone(), cfg).await {
                Ok(resp) => return Ok(resp),
                Err(e) if attempt < cfg.max_retries && e.is_retryable_before_first_byte() => {
                    attempt += 1;
                    tokio::time::sleep(cfg.retry_backoff).await;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_once(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: Vec<u8>,
        cfg: &UpstreamRequestConfig,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|e| UpstreamError::Other(e.to_string()))?;
        let mut req = self.http.request(method, url).body(body);
        for (k, v) in headers {
            req = req.header(k, v);
        }

        let send = req.send();
        let response = tokio::time::timeout(cfg.total_timeout, send)
            .await
            .map_err(|_| UpstreamError::Timeout)?
            .map_err(|e| {
                if e.is_connect() {
                    UpstreamError::Connect(e.to_string())
                } else if e.is_timeout() {
                    UpstreamError::Timeout
                } else {
                    UpstreamError::Other(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let byte_stream = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| {
                if e.is_timeout() {
                    StreamErrorKind::TimeoutError
                } else if e.is_connect() {
                    StreamErrorKind::ConnectError
                } else if e.is_decode() {
                    StreamErrorKind::DecodeError
                } else {
                    StreamErrorKind::ReadError
                }
            })
        });

        Ok(UpstreamResponse {
            status,
            body_stream: Box::pin(byte_stream),
        })
    }
}

impl Default for UpstreamClient {
    fn default() -> Self {
        UpstreamClient::new()
    }
}
