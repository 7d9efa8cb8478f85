// crates/conduit-server/src/jsonrpc.rs
// ============================================================================
// Module: JSON-RPC Service
// Description: JSON-RPC 2.0 envelope types and the shared request handler.
// Purpose: Give the stdio and HTTP transports one protocol implementation.
// Dependencies: conduit-core, async-trait, serde, serde_json
// ============================================================================

//! ## Overview
//! [`RpcService`] turns one JSON-RPC request into at most one response by
//! routing through the [`Dispatcher`]. Transports only frame bytes and
//! build a [`RequestOrigin`]; everything else (trace ids, deadlines, result
//! wrapping, audit) happens here so every transport produces the same
//! `CommandResult` JSON.
//!
//! Methods: `initialize`, `ping`, `tools/list`, `tools/call`, and
//! `tools/stream`. Streaming calls push every chunk through a [`ChunkSink`]
//! before the final response. Security posture: request bodies are untrusted;
//! malformed envelopes are answered with protocol errors, never panics.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use conduit_core::CancellationToken;
use conduit_core::CommandContext;
use conduit_core::CommandDescriptor;
use conduit_core::CommandError;
use conduit_core::CommandResult;
use conduit_core::Dispatcher;
use conduit_core::StreamChunk;
use conduit_core::TraceIdGenerator;
use conduit_core::TransportKind;
use conduit_core::context::duration_millis;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use crate::audit::AuditSink;
use crate::audit::RequestAuditEvent;
use crate::audit::RequestAuditEventParams;
use crate::audit::RequestOutcome;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// JSON-RPC protocol version.
pub const JSONRPC_VERSION: &str = "2.0";
/// Protocol revision reported by `initialize`.
pub const PROTOCOL_VERSION: &str = "conduit/1";
/// Method that pushes stream chunks.
pub const CHUNK_NOTIFICATION: &str = "notifications/chunk";
/// Method that cancels an in-flight request.
pub const CANCEL_NOTIFICATION: &str = "notifications/cancelled";

/// JSON-RPC error codes used by the transports.
pub mod rpc_codes {
    /// Body is not valid JSON.
    pub const PARSE_ERROR: i64 = -32_700;
    /// JSON is not a valid request envelope.
    pub const INVALID_REQUEST: i64 = -32_600;
    /// Unknown method.
    pub const METHOD_NOT_FOUND: i64 = -32_601;
    /// Params do not match the method.
    pub const INVALID_PARAMS: i64 = -32_602;
    /// Internal protocol failure.
    pub const INTERNAL_ERROR: i64 = -32_603;
    /// Server is at its in-flight limit.
    pub const SERVER_BUSY: i64 = -32_000;
    /// Request body exceeds the configured limit.
    pub const REQUEST_TOO_LARGE: i64 = -32_070;
}

// ============================================================================
// SECTION: Envelopes
// ============================================================================

/// Incoming JSON-RPC request or notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version; optional, but must be `"2.0"` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
    /// Request identifier; absent on notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Optional parameters payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Builds a request with an id.
    #[must_use]
    pub fn new(id: Value, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// Returns true when no response is expected.
    #[must_use]
    pub const fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC protocol version.
    pub jsonrpc: String,
    /// Request identifier.
    pub id: Value,
    /// Successful result payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload when the request fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Builds a success response.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error response.
    #[must_use]
    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// JSON-RPC error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
}

/// Server-initiated notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC protocol version.
    pub jsonrpc: String,
    /// Notification method.
    pub method: String,
    /// Notification payload.
    pub params: Value,
}

impl JsonRpcNotification {
    /// Builds a `notifications/chunk` message for a streaming request.
    #[must_use]
    pub fn chunk(request_id: &Value, chunk: &StreamChunk) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: CHUNK_NOTIFICATION.to_string(),
            params: json!({ "requestId": request_id, "chunk": chunk }),
        }
    }
}

/// Parameters of `tools/call` and `tools/stream`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallParams {
    /// Command name.
    pub name: String,
    /// Raw JSON arguments.
    #[serde(default)]
    pub arguments: Value,
}

/// Parameters of `notifications/cancelled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelParams {
    /// Identifier of the request to cancel.
    pub request_id: Value,
}

/// Tool output payloads for JSON-RPC responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    /// JSON-encoded `CommandResult`.
    Text {
        /// Encoded payload.
        text: String,
    },
}

/// `tools/call` response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Tool output content.
    pub content: Vec<ToolContent>,
    /// True when the wrapped command result failed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Wraps a command result as text content.
    ///
    /// # Errors
    ///
    /// Returns an error when the result cannot be serialized.
    pub fn from_result(result: &CommandResult) -> Result<Self, serde_json::Error> {
        Ok(Self {
            content: vec![ToolContent::Text {
                text: serde_json::to_string(result)?,
            }],
            is_error: !result.is_success(),
        })
    }

    /// Decodes the wrapped command result.
    ///
    /// # Errors
    ///
    /// Returns an error when the content is missing or does not decode.
    pub fn command_result(&self) -> Result<CommandResult, serde_json::Error> {
        let text = self.content.iter().map(|ToolContent::Text { text }| text.as_str()).next();
        serde_json::from_str(text.unwrap_or_default())
    }
}

/// `tools/list` response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolListResult {
    /// Registered command descriptors.
    pub tools: Vec<CommandDescriptor>,
}

// ============================================================================
// SECTION: Origin and Sinks
// ============================================================================

/// Transport-provided facts about one request.
#[derive(Debug, Clone)]
pub struct RequestOrigin {
    /// Transport that delivered the request.
    pub transport: TransportKind,
    /// Client-supplied correlation id, sanitized before use.
    pub correlation_id: Option<String>,
    /// Caller identity when known.
    pub caller: Option<String>,
    /// Client-requested deadline.
    pub timeout: Option<Duration>,
    /// Cancellation token owned by the transport.
    pub cancellation: CancellationToken,
    /// Request size in bytes.
    pub request_bytes: usize,
}

impl RequestOrigin {
    /// Creates an origin with no caller facts.
    #[must_use]
    pub fn new(transport: TransportKind) -> Self {
        Self {
            transport,
            correlation_id: None,
            caller: None,
            timeout: None,
            cancellation: CancellationToken::new(),
            request_bytes: 0,
        }
    }
}

/// Receives chunks of `tools/stream` calls as they are produced.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// Delivers one chunk belonging to `request_id`.
    async fn push(&self, request_id: &Value, chunk: &StreamChunk);
}

/// Sink that drops every chunk.
pub struct DiscardChunks;

#[async_trait]
impl ChunkSink for DiscardChunks {
    async fn push(&self, _request_id: &Value, _chunk: &StreamChunk) {}
}

/// Encoded response plus the protocol error code it carries, if any.
#[derive(Debug, Clone)]
pub struct RpcReply {
    /// Serialized response envelope.
    pub body: Vec<u8>,
    /// JSON-RPC error code when the response is an error.
    pub error_code: Option<i64>,
}

// ============================================================================
// SECTION: Service
// ============================================================================

/// Shared JSON-RPC request handler.
pub struct RpcService {
    /// Dispatch path for every call.
    dispatcher: Dispatcher,
    /// Trace id source for requests without a correlation id.
    trace_ids: TraceIdGenerator,
    /// Request audit sink.
    audit: Arc<dyn AuditSink>,
    /// Deadline applied when the client sets none.
    default_timeout: Option<Duration>,
    /// Name reported by `initialize`.
    server_name: String,
}

/// Facts gathered while handling one request, used for auditing.
struct Exchange {
    /// Command named by the request.
    command: Option<String>,
    /// Command error code of a failed result.
    command_error: Option<String>,
}

impl RpcService {
    /// Creates a service over a dispatcher.
    #[must_use]
    pub fn new(dispatcher: Dispatcher, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            dispatcher,
            trace_ids: TraceIdGenerator::new("conduit"),
            audit,
            default_timeout: None,
            server_name: "conduit".to_string(),
        }
    }

    /// Sets the deadline applied when the client sets none.
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Returns the dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Fixes the trace id of a request, accepting a valid client
    /// correlation id, and returns it.
    pub fn assign_trace_id(&self, origin: &mut RequestOrigin) -> String {
        let trace_id = self.trace_ids.issue_or_accept(origin.correlation_id.as_deref());
        origin.correlation_id = Some(trace_id.clone());
        trace_id
    }

    /// Builds the command context for a request.
    #[must_use]
    pub fn context(&self, origin: &RequestOrigin) -> CommandContext {
        let trace_id = self.trace_ids.issue_or_accept(origin.correlation_id.as_deref());
        let mut context = CommandContext::new(trace_id, origin.transport)
            .with_cancellation(origin.cancellation.clone());
        if let Some(caller) = &origin.caller {
            context = context.with_caller(caller.clone());
        }
        if let Some(timeout) = origin.timeout.or(self.default_timeout) {
            context = context.with_timeout(timeout);
        }
        context
    }

    /// Encodes and audits a protocol error produced outside [`Self::handle`].
    pub fn reject(&self, origin: &RequestOrigin, response: &JsonRpcResponse) -> RpcReply {
        let reply = encode(response);
        self.audit.record(&RequestAuditEvent::new(RequestAuditEventParams {
            trace_id: origin.correlation_id.clone(),
            transport: origin.transport.as_str(),
            method: "rejected".to_string(),
            command: None,
            outcome: RequestOutcome::ProtocolError,
            error_code: reply.error_code.map(|code| code.to_string()),
            duration_ms: 0,
            request_bytes: origin.request_bytes,
            response_bytes: reply.body.len(),
            caller: origin.caller.clone(),
        }));
        reply
    }

    /// Parses a raw body into a request.
    ///
    /// # Errors
    ///
    /// Returns the protocol error response for bodies that are not JSON
    /// (`-32700`) or not a request envelope (`-32600`).
    pub fn parse(bytes: &[u8]) -> Result<JsonRpcRequest, JsonRpcResponse> {
        let value: Value = serde_json::from_slice(bytes).map_err(|_| {
            JsonRpcResponse::failure(Value::Null, rpc_codes::PARSE_ERROR, "parse error")
        })?;
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|_| {
            JsonRpcResponse::failure(id, rpc_codes::INVALID_REQUEST, "invalid json-rpc request")
        })
    }

    /// Parses, handles, and encodes one request body.
    ///
    /// Returns `None` for notifications.
    pub async fn handle_bytes(
        &self,
        bytes: &[u8],
        origin: RequestOrigin,
        chunks: &dyn ChunkSink,
    ) -> Option<RpcReply> {
        match Self::parse(bytes) {
            Ok(request) => self.handle(request, origin, chunks).await,
            Err(response) => Some(self.reject(&origin, &response)),
        }
    }

    /// Handles one parsed request.
    ///
    /// Returns `None` for notifications.
    pub async fn handle(
        &self,
        request: JsonRpcRequest,
        origin: RequestOrigin,
        chunks: &dyn ChunkSink,
    ) -> Option<RpcReply> {
        let started = Instant::now();
        let context = self.context(&origin);
        let trace_id = context.trace_id.clone();
        let method = request.method.clone();
        let mut exchange = Exchange {
            command: None,
            command_error: None,
        };
        let response = match request.id.clone() {
            None => {
                if !method.starts_with("notifications/") {
                    tracing::debug!(method = %method, "ignoring request without id");
                }
                None
            }
            Some(id) => Some(self.respond(id, request, context, chunks, &mut exchange).await),
        };
        let reply = response.as_ref().map(encode);
        let outcome = match (&reply, &exchange.command_error) {
            (Some(RpcReply { error_code: Some(_), .. }), _) => RequestOutcome::ProtocolError,
            (_, Some(_)) => RequestOutcome::CommandError,
            _ => RequestOutcome::Ok,
        };
        let error_code = reply
            .as_ref()
            .and_then(|reply| reply.error_code)
            .map(|code| code.to_string())
            .or(exchange.command_error);
        self.audit.record(&RequestAuditEvent::new(RequestAuditEventParams {
            trace_id: Some(trace_id),
            transport: origin.transport.as_str(),
            method,
            command: exchange.command,
            outcome,
            error_code,
            duration_ms: duration_millis(started.elapsed()),
            request_bytes: origin.request_bytes,
            response_bytes: reply.as_ref().map_or(0, |reply| reply.body.len()),
            caller: origin.caller,
        }));
        reply
    }

    /// Produces the response for a request with an id.
    async fn respond(
        &self,
        id: Value,
        request: JsonRpcRequest,
        context: CommandContext,
        chunks: &dyn ChunkSink,
        exchange: &mut Exchange,
    ) -> JsonRpcResponse {
        if let Some(version) = request.jsonrpc.as_deref()
            && version != JSONRPC_VERSION
        {
            return JsonRpcResponse::failure(
                id,
                rpc_codes::INVALID_REQUEST,
                "invalid json-rpc version",
            );
        }
        let outcome = match request.method.as_str() {
            "initialize" => Ok(self.initialize_result()),
            "ping" => Ok(json!({})),
            "tools/list" => serde_json::to_value(ToolListResult {
                tools: self.dispatcher.descriptors(),
            })
            .map_err(|_| internal_error()),
            "tools/call" => match call_params(request.params) {
                Ok(params) => {
                    exchange.command = Some(params.name.clone());
                    let result =
                        self.dispatcher.call(&params.name, params.arguments, context).await;
                    wrap_result(&result, exchange)
                }
                Err(error) => Err(error),
            },
            "tools/stream" => match call_params(request.params) {
                Ok(params) => {
                    exchange.command = Some(params.name.clone());
                    let result = self.stream(&id, params, context, chunks).await;
                    wrap_result(&result, exchange)
                }
                Err(error) => Err(error),
            },
            _ => Err(JsonRpcError {
                code: rpc_codes::METHOD_NOT_FOUND,
                message: "method not found".to_string(),
            }),
        };
        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id,
                result: None,
                error: Some(error),
            },
        }
    }

    /// Runs a streaming call, pushing every chunk, and returns its outcome.
    async fn stream(
        &self,
        id: &Value,
        params: ToolCallParams,
        context: CommandContext,
        chunks: &dyn ChunkSink,
    ) -> CommandResult {
        let mut stream = self.dispatcher.stream(&params.name, params.arguments, context).await;
        while let Some(chunk) = stream.next().await {
            chunks.push(id, &chunk).await;
            match chunk {
                StreamChunk::Complete(complete) => return complete.result,
                StreamChunk::Error(error) => return CommandResult::failure(error.error),
                StreamChunk::Progress(_) | StreamChunk::Data(_) => {}
            }
        }
        CommandResult::failure(CommandError::internal("stream ended without a terminal chunk"))
    }

    /// Builds the `initialize` payload.
    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": {
                "name": self.server_name,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {
                "tools": { "listChanged": true },
                "streaming": true,
                "cancellation": true,
            },
            "middleware": self.dispatcher.middleware_names(),
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Decodes `tools/call` parameters.
fn call_params(params: Option<Value>) -> Result<ToolCallParams, JsonRpcError> {
    serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|_| JsonRpcError {
        code: rpc_codes::INVALID_PARAMS,
        message: "invalid tool params".to_string(),
    })
}

/// Wraps a command result, noting its error code for auditing.
fn wrap_result(result: &CommandResult, exchange: &mut Exchange) -> Result<Value, JsonRpcError> {
    exchange.command_error = result.error().map(|error| error.code.clone());
    ToolCallResult::from_result(result)
        .and_then(serde_json::to_value)
        .map_err(|_| internal_error())
}

/// Protocol error for serialization failures.
fn internal_error() -> JsonRpcError {
    JsonRpcError {
        code: rpc_codes::INTERNAL_ERROR,
        message: "serialization failed".to_string(),
    }
}

/// Serializes a response envelope.
fn encode(response: &JsonRpcResponse) -> RpcReply {
    let error_code = response.error.as_ref().map(|error| error.code);
    let body = serde_json::to_vec(response).unwrap_or_else(|_| {
        br#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"serialization failed"}}"#
            .to_vec()
    });
    RpcReply {
        body,
        error_code,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
