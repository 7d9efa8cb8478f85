// crates/conduit-cli/src/client.rs
// ============================================================================
// Module: Conduit HTTP Client
// Description: JSON-RPC, batch, pipeline, and SSE stream calls.
// Purpose: Give the CLI typed access to a running Conduit server.
// Dependencies: reqwest, serde_json, conduit-core
// ============================================================================

//! ## Overview
//! [`ConduitClient`] talks to the HTTP transport: `tools/list` and
//! `tools/call` over `POST /rpc`, batches over `POST /batch`, pipelines over
//! `POST /pipeline`, and streams over `POST /stream`, parsed incrementally
//! by [`SseParser`].
//!
//! Security posture: server responses are untrusted; response bodies are
//! size-bounded and decoding failures are reported, never assumed away.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use conduit_core::BatchRequest;
use conduit_core::BatchResponse;
use conduit_core::CommandDescriptor;
use conduit_core::CommandResult;
use conduit_core::PipelineRequest;
use conduit_core::PipelineResult;
use conduit_core::StreamChunk;
use reqwest::Client;
use reqwest::StatusCode;
use reqwest::redirect::Policy;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Largest response body the client accepts.
pub const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;
/// Largest single SSE event the parser buffers.
const MAX_EVENT_BYTES: usize = 1024 * 1024;
/// Request timeout for non-streaming calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Client failures.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server URL is not usable.
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
    /// The request could not be sent or the response not read.
    #[error("request failed: {0}")]
    Transport(String),
    /// The server answered with a protocol error.
    #[error("server error {code}: {message}")]
    Protocol {
        /// JSON-RPC or HTTP code.
        code: i64,
        /// Error message.
        message: String,
    },
    /// The response did not decode.
    #[error("invalid response: {0}")]
    Decode(String),
}

// ============================================================================
// SECTION: Types
// ============================================================================

/// Health report of a server.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    /// `ok` or `degraded`.
    pub status: String,
    /// Server uptime.
    pub uptime_ms: u64,
}

/// One parsed server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name; `message` when the server sent none.
    pub event: String,
    /// Joined `data` lines.
    pub data: String,
}

/// Incremental server-sent events parser.
#[derive(Debug, Default)]
pub struct SseParser {
    /// Bytes not yet terminated by a blank line.
    buffer: Vec<u8>,
}

impl SseParser {
    /// Feeds bytes and returns the events they complete.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Decode`] when an unterminated event grows past
    /// the buffer limit.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<SseEvent>, ClientError> {
        self.buffer.extend(bytes.iter().filter(|byte| **byte != b'\r'));
        let mut events = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|pair| pair == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(.. end + 2).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        if self.buffer.len() > MAX_EVENT_BYTES {
            return Err(ClientError::Decode("event exceeds size limit".to_string()));
        }
        Ok(events)
    }
}

/// Parses one blank-line-terminated block; comments and empty blocks yield
/// nothing.
fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();
    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }
    if event.is_none() && data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event: event.unwrap_or_else(|| "message".to_string()),
        data: data.join("\n"),
    })
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// HTTP client for one Conduit server.
#[derive(Debug)]
pub struct ConduitClient {
    /// Server base URL.
    base: Url,
    /// HTTP client.
    http: Client,
    /// Request id counter.
    next_id: AtomicU64,
}

impl ConduitClient {
    /// Creates a client for the server at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidUrl`] for non-HTTP URLs and
    /// [`ClientError::Transport`] when the HTTP client cannot be built.
    pub fn new(url: &str) -> Result<Self, ClientError> {
        let base = parse_server_url(url)?;
        let http = Client::builder()
            .redirect(Policy::none())
            .build()
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        Ok(Self {
            base,
            http,
            next_id: AtomicU64::new(1),
        })
    }

    /// Returns the server base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base
    }

    /// Fetches `GET /health`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the server is unreachable or answers
    /// with something other than a health report.
    pub async fn health(&self) -> Result<Health, ClientError> {
        let response = self
            .http
            .get(self.endpoint("health")?)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        let bytes = read_body(response).await?;
        serde_json::from_slice(&bytes).map_err(|err| ClientError::Decode(err.to_string()))
    }

    /// Lists the server's commands.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or protocol failure.
    pub async fn list_tools(&self) -> Result<Vec<CommandDescriptor>, ClientError> {
        let result = self.rpc("tools/list", json!({})).await?;
        let tools = result.get("tools").cloned().unwrap_or(Value::Null);
        serde_json::from_value(tools).map_err(|err| ClientError::Decode(err.to_string()))
    }

    /// Calls a command and returns its result.
    ///
    /// Command failures are `Ok` values carrying a failed result.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or protocol failure.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<CommandResult, ClientError> {
        let result = self.rpc("tools/call", json!({ "name": name, "arguments": arguments })).await?;
        let text = result
            .pointer("/content/0/text")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Decode("tool result has no text content".to_string()))?;
        serde_json::from_str(text).map_err(|err| ClientError::Decode(err.to_string()))
    }

    /// Runs a batch.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Protocol`] when the server rejects the batch
    /// and [`ClientError`] on transport failure.
    pub async fn batch(&self, request: &BatchRequest) -> Result<BatchResponse, ClientError> {
        self.post_json("batch", request).await
    }

    /// Runs a pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Protocol`] when the server rejects the
    /// pipeline and [`ClientError`] on transport failure.
    pub async fn pipeline(
        &self,
        request: &PipelineRequest,
    ) -> Result<PipelineResult, ClientError> {
        self.post_json("pipeline", request).await
    }

    /// Posts a JSON body to a non-RPC route and decodes a 200 reply.
    ///
    /// Non-200 replies carry a failed [`CommandResult`] whose message
    /// becomes the protocol error.
    async fn post_json<B, R>(&self, route: &str, body: &B) -> Result<R, ClientError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.endpoint(route)?)
            .timeout(REQUEST_TIMEOUT)
            .json(body)
            .send()
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        let status = response.status();
        let bytes = read_body(response).await?;
        if status != StatusCode::OK {
            let message = serde_json::from_slice::<CommandResult>(&bytes)
                .ok()
                .and_then(|result| result.error().map(|error| error.message.clone()))
                .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());
            return Err(ClientError::Protocol {
                code: i64::from(status.as_u16()),
                message,
            });
        }
        serde_json::from_slice(&bytes).map_err(|err| ClientError::Decode(err.to_string()))
    }

    /// Streams a command, passing each chunk to `on_chunk` as it arrives.
    ///
    /// Returns the terminal chunk.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure or when the stream ends
    /// without a terminal chunk.
    pub async fn stream<F>(
        &self,
        name: &str,
        arguments: Value,
        mut on_chunk: F,
    ) -> Result<StreamChunk, ClientError>
    where
        F: FnMut(&StreamChunk),
    {
        let mut response = self
            .http
            .post(self.endpoint("stream")?)
            .json(&json!({ "name": name, "arguments": arguments }))
            .send()
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        if response.status() != StatusCode::OK {
            let status = response.status();
            let bytes = read_body(response).await?;
            return Err(ClientError::Protocol {
                code: i64::from(status.as_u16()),
                message: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        let mut parser = SseParser::default();
        while let Some(bytes) =
            response.chunk().await.map_err(|err| ClientError::Transport(err.to_string()))?
        {
            for event in parser.push(&bytes)? {
                let chunk: StreamChunk = serde_json::from_str(&event.data)
                    .map_err(|err| ClientError::Decode(err.to_string()))?;
                on_chunk(&chunk);
                if chunk.is_terminal() {
                    return Ok(chunk);
                }
            }
        }
        Err(ClientError::Decode("stream ended without a terminal chunk".to_string()))
    }

    /// Sends one JSON-RPC request and returns its `result`.
    async fn rpc(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .http
            .post(self.endpoint("rpc")?)
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
            .send()
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        let bytes = read_body(response).await?;
        let mut envelope: Value =
            serde_json::from_slice(&bytes).map_err(|err| ClientError::Decode(err.to_string()))?;
        if let Some(error) = envelope.get("error") {
            return Err(ClientError::Protocol {
                code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        envelope
            .get_mut("result")
            .map(Value::take)
            .ok_or_else(|| ClientError::Decode("response has no result".to_string()))
    }

    /// Resolves a route against the base URL.
    fn endpoint(&self, route: &str) -> Result<Url, ClientError> {
        self.base.join(route).map_err(|err| ClientError::InvalidUrl(err.to_string()))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Parses and normalizes a server URL so routes join beneath its path.
///
/// # Errors
///
/// Returns [`ClientError::InvalidUrl`] for unparsable or non-HTTP URLs.
pub fn parse_server_url(url: &str) -> Result<Url, ClientError> {
    let mut parsed =
        Url::parse(url.trim()).map_err(|err| ClientError::InvalidUrl(err.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ClientError::InvalidUrl(format!("unsupported scheme: {}", parsed.scheme())));
    }
    if !parsed.path().ends_with('/') {
        let path = format!("{}/", parsed.path());
        parsed.set_path(&path);
    }
    Ok(parsed)
}

/// Reads a response body within the size limit.
async fn read_body(mut response: reqwest::Response) -> Result<Vec<u8>, ClientError> {
    let mut body = Vec::new();
    while let Some(chunk) =
        response.chunk().await.map_err(|err| ClientError::Transport(err.to_string()))?
    {
        if body.len() + chunk.len() > MAX_RESPONSE_BYTES {
            return Err(ClientError::Decode("response exceeds size limit".to_string()));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
