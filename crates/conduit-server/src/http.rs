// crates/conduit-server/src/http.rs
// ============================================================================
// Module: HTTP Transport
// Description: axum routes for calls, batches, pipelines, streams, events.
// Purpose: Expose the dispatcher to networked callers.
// Dependencies: axum, tokio, tokio-stream, crate::jsonrpc
// ============================================================================

//! ## Overview
//! Routes:
//! - `POST /rpc`: one JSON-RPC request; `tools/stream` chunks are published
//!   on the push channel.
//! - `POST /batch`: a batch request answered with a batch response.
//! - `POST /pipeline`: a pipeline request answered with a pipeline result.
//! - `POST /stream`: `{name, arguments}` answered as SSE, one event per chunk
//!   named after the chunk type.
//! - `GET /events`: SSE push channel (`ready`, `tools_changed`,
//!   `stream_chunk`).
//! - `GET /health`: liveness, independent of command execution.
//!
//! Request headers: `x-correlation-id` (echoed, becomes the trace id when
//! valid), `x-conduit-caller`, and `x-conduit-timeout-ms`. At most
//! `max_inflight` calls run at once; excess calls get 503. Bodies over
//! `max_body_bytes` get 413.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::extract::State;
use axum::extract::rejection::BytesRejection;
use axum::http::HeaderMap;
use axum::http::HeaderName;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::response::Sse;
use axum::response::sse::Event;
use axum::response::sse::KeepAlive;
use axum::routing::get;
use axum::routing::post;
use conduit_core::BatchExecutor;
use conduit_core::BatchRequest;
use conduit_core::CommandError;
use conduit_core::CommandResult;
use conduit_core::PipelineExecutor;
use conduit_core::PipelineRequest;
use conduit_core::StreamChunk;
use conduit_core::TransportKind;
use conduit_core::context::duration_millis;
use conduit_core::error_codes;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::OwnedSemaphorePermit;
use tokio::sync::Semaphore;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::ReceiverStream;

use crate::audit::AuditSink;
use crate::audit::RequestAuditEvent;
use crate::audit::RequestAuditEventParams;
use crate::audit::RequestOutcome;
use crate::error::ServerError;
use crate::jsonrpc::ChunkSink;
use crate::jsonrpc::JsonRpcResponse;
use crate::jsonrpc::RequestOrigin;
use crate::jsonrpc::RpcService;
use crate::jsonrpc::ToolCallParams;
use crate::jsonrpc::rpc_codes;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Header carrying the client correlation id.
pub const CORRELATION_HEADER: &str = "x-correlation-id";
/// Header carrying the caller identity.
pub const CALLER_HEADER: &str = "x-conduit-caller";
/// Header carrying the per-request deadline in milliseconds.
pub const TIMEOUT_HEADER: &str = "x-conduit-timeout-ms";
/// Push events buffered per subscriber before it lags.
const EVENT_CAPACITY: usize = 256;
/// Chunks buffered ahead of a slow SSE client.
const SSE_CAPACITY: usize = 16;

// ============================================================================
// SECTION: State
// ============================================================================

/// Request limits of the HTTP transport.
#[derive(Debug, Clone, Copy)]
pub struct HttpLimits {
    /// Largest accepted request body.
    pub max_body_bytes: usize,
    /// Calls running at once.
    pub max_inflight: usize,
}

/// Server-initiated event on the push channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    /// The command listing changed.
    ToolsChanged,
    /// A chunk of a `tools/stream` call made over `/rpc`.
    StreamChunk {
        /// Request id of the streaming call.
        #[serde(rename = "requestId")]
        request_id: Value,
        /// The chunk.
        chunk: StreamChunk,
    },
}

impl PushEvent {
    /// Converts to an SSE event.
    fn to_sse(&self) -> Event {
        match self {
            Self::ToolsChanged => Event::default().event("tools_changed").data("{}"),
            Self::StreamChunk {
                request_id,
                chunk,
            } => Event::default()
                .event("stream_chunk")
                .data(json!({ "requestId": request_id, "chunk": chunk }).to_string()),
        }
    }
}

/// Command surface currently served.
struct Commands {
    /// JSON-RPC service.
    service: Arc<RpcService>,
    /// Batch runner.
    batch: BatchExecutor,
    /// Pipeline runner.
    pipelines: PipelineExecutor,
}

/// Shared state of the HTTP routes.
pub struct HttpState {
    /// Served commands; replaced whole, never mutated in place.
    commands: RwLock<Arc<Commands>>,
    /// Audit sink for routes outside JSON-RPC.
    audit: Arc<dyn AuditSink>,
    /// Push channel.
    events: broadcast::Sender<PushEvent>,
    /// In-flight call permits.
    inflight: Arc<Semaphore>,
    /// Request limits.
    limits: HttpLimits,
    /// Server start, for uptime.
    started: Instant,
}

impl HttpState {
    /// Creates the route state.
    #[must_use]
    pub fn new(
        service: Arc<RpcService>,
        batch: BatchExecutor,
        pipelines: PipelineExecutor,
        audit: Arc<dyn AuditSink>,
        limits: HttpLimits,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            commands: RwLock::new(Arc::new(Commands {
                service,
                batch,
                pipelines,
            })),
            audit,
            events,
            inflight: Arc::new(Semaphore::new(limits.max_inflight.max(1))),
            limits,
            started: Instant::now(),
        }
    }

    /// Swaps in a new command surface and announces `tools_changed`.
    ///
    /// Calls already running finish against the surface they started on.
    pub fn replace_commands(
        &self,
        service: Arc<RpcService>,
        batch: BatchExecutor,
        pipelines: PipelineExecutor,
    ) {
        let next = Arc::new(Commands {
            service,
            batch,
            pipelines,
        });
        *self.commands.write().unwrap_or_else(PoisonError::into_inner) = next;
        tracing::info!("served command listing replaced");
        let _ = self.events.send(PushEvent::ToolsChanged);
    }

    /// Returns the command surface for one request.
    fn commands(&self) -> Arc<Commands> {
        Arc::clone(&self.commands.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Returns a receiver of push events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.events.subscribe()
    }

    /// Builds the request origin from headers.
    fn origin(&self, headers: &HeaderMap, request_bytes: usize) -> RequestOrigin {
        let mut origin = RequestOrigin::new(TransportKind::Http);
        origin.correlation_id = header_str(headers, CORRELATION_HEADER).map(str::to_string);
        origin.caller = header_str(headers, CALLER_HEADER).map(str::to_string);
        origin.timeout = header_str(headers, TIMEOUT_HEADER)
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        origin.request_bytes = request_bytes;
        self.commands().service.assign_trace_id(&mut origin);
        origin
    }

    /// Takes an in-flight permit without waiting.
    fn try_admit(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.inflight).try_acquire_owned().ok()
    }

    /// Records an audit event for a non-JSON-RPC route.
    fn audit_route(&self, origin: &RequestOrigin, route: &str, record: RouteRecord) {
        self.audit.record(&RequestAuditEvent::new(RequestAuditEventParams {
            trace_id: origin.correlation_id.clone(),
            transport: TransportKind::Http.as_str(),
            method: route.to_string(),
            command: record.command,
            outcome: record.outcome,
            error_code: record.error_code,
            duration_ms: duration_millis(record.started.elapsed()),
            request_bytes: origin.request_bytes,
            response_bytes: record.response_bytes,
            caller: origin.caller.clone(),
        }));
    }
}

/// Audit facts of a non-JSON-RPC route.
struct RouteRecord {
    /// Command name when known.
    command: Option<String>,
    /// Outcome label.
    outcome: RequestOutcome,
    /// Error code when failed.
    error_code: Option<String>,
    /// Handling start.
    started: Instant,
    /// Response size.
    response_bytes: usize,
}

/// Chunk sink publishing to the push channel.
struct BroadcastChunks {
    /// Push channel.
    events: broadcast::Sender<PushEvent>,
}

#[async_trait]
impl ChunkSink for BroadcastChunks {
    async fn push(&self, request_id: &Value, chunk: &StreamChunk) {
        let _ = self.events.send(PushEvent::StreamChunk {
            request_id: request_id.clone(),
            chunk: chunk.clone(),
        });
    }
}

// ============================================================================
// SECTION: Serving
// ============================================================================

/// Builds the router.
pub fn router(state: Arc<HttpState>) -> Router {
    let max_body_bytes = state.limits.max_body_bytes;
    Router::new()
        .route("/rpc", post(handle_rpc))
        .route("/batch", post(handle_batch))
        .route("/pipeline", post(handle_pipeline))
        .route("/stream", post(handle_stream))
        .route("/events", get(handle_events))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Serves the router on a bound listener.
///
/// # Errors
///
/// Returns [`ServerError::Transport`] when the server fails.
pub async fn serve_http(listener: TcpListener, state: Arc<HttpState>) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "http transport listening");
    }
    axum::serve(listener, router(state))
        .await
        .map_err(|err| ServerError::Transport(format!("http server failed: {err}")))
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Handles `POST /rpc`.
async fn handle_rpc(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let bytes = match body {
        Ok(bytes) => bytes,
        Err(rejection) => return body_rejected(&state, &headers, &rejection),
    };
    let origin = state.origin(&headers, bytes.len());
    let trace_id = origin.correlation_id.clone();
    let Some(_permit) = state.try_admit() else {
        let response =
            JsonRpcResponse::failure(Value::Null, rpc_codes::SERVER_BUSY, "server busy");
        let reply = state.commands().service.reject(&origin, &response);
        return json_bytes(StatusCode::SERVICE_UNAVAILABLE, reply.body, trace_id.as_deref());
    };
    let sink = BroadcastChunks {
        events: state.events.clone(),
    };
    let commands = state.commands();
    match commands.service.handle_bytes(&bytes, origin, &sink).await {
        Some(reply) => {
            let status = match reply.error_code {
                Some(rpc_codes::PARSE_ERROR | rpc_codes::INVALID_REQUEST) => {
                    StatusCode::BAD_REQUEST
                }
                _ => StatusCode::OK,
            };
            json_bytes(status, reply.body, trace_id.as_deref())
        }
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// Handles `POST /batch`.
async fn handle_batch(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let started = Instant::now();
    let bytes = match body {
        Ok(bytes) => bytes,
        Err(rejection) => return body_rejected(&state, &headers, &rejection),
    };
    let origin = state.origin(&headers, bytes.len());
    let trace_id = origin.correlation_id.clone();
    let Some(_permit) = state.try_admit() else {
        return busy(&state, &origin, "/batch", started);
    };
    let (status, payload, outcome, error_code) =
        match serde_json::from_slice::<BatchRequest>(&bytes) {
            Err(err) => {
                let error = CommandError::new(
                    error_codes::INVALID_BATCH_REQUEST,
                    format!("Malformed batch request: {err}"),
                )
                .with_retryable(false);
                let code = error.code.clone();
                (
                    StatusCode::BAD_REQUEST,
                    serde_json::to_vec(&CommandResult::<Value>::failure(error)),
                    RequestOutcome::ProtocolError,
                    Some(code),
                )
            }
            Ok(request) => {
                let commands = state.commands();
                let context = commands.service.context(&origin);
                match commands.batch.execute(request, context).await {
                    Ok(response) => {
                        let outcome = if response.summary.failed == 0 {
                            RequestOutcome::Ok
                        } else {
                            RequestOutcome::CommandError
                        };
                        (StatusCode::OK, serde_json::to_vec(&response), outcome, None)
                    }
                    Err(err) => (
                        StatusCode::BAD_REQUEST,
                        serde_json::to_vec(&CommandResult::<Value>::failure(
                            err.to_command_error(),
                        )),
                        RequestOutcome::ProtocolError,
                        Some(err.code().to_string()),
                    ),
                }
            }
        };
    let body = payload.unwrap_or_default();
    state.audit_route(
        &origin,
        "/batch",
        RouteRecord {
            command: None,
            outcome,
            error_code,
            started,
            response_bytes: body.len(),
        },
    );
    json_bytes(status, body, trace_id.as_deref())
}

/// Handles `POST /pipeline`.
async fn handle_pipeline(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let started = Instant::now();
    let bytes = match body {
        Ok(bytes) => bytes,
        Err(rejection) => return body_rejected(&state, &headers, &rejection),
    };
    let origin = state.origin(&headers, bytes.len());
    let trace_id = origin.correlation_id.clone();
    let Some(_permit) = state.try_admit() else {
        return busy(&state, &origin, "/pipeline", started);
    };
    let (status, payload, outcome, error_code) =
        match serde_json::from_slice::<PipelineRequest>(&bytes) {
            Err(err) => {
                let error = CommandError::new(
                    error_codes::INVALID_PIPELINE_REQUEST,
                    format!("Malformed pipeline request: {err}"),
                )
                .with_retryable(false);
                let code = error.code.clone();
                (
                    StatusCode::BAD_REQUEST,
                    serde_json::to_vec(&CommandResult::<Value>::failure(error)),
                    RequestOutcome::ProtocolError,
                    Some(code),
                )
            }
            Ok(request) => {
                let commands = state.commands();
                let context = commands.service.context(&origin);
                match commands.pipelines.execute(request, context).await {
                    Ok(result) => {
                        let outcome = if result.is_success() {
                            RequestOutcome::Ok
                        } else {
                            RequestOutcome::CommandError
                        };
                        (StatusCode::OK, serde_json::to_vec(&result), outcome, None)
                    }
                    Err(err) => (
                        StatusCode::BAD_REQUEST,
                        serde_json::to_vec(&CommandResult::<Value>::failure(
                            err.to_command_error(),
                        )),
                        RequestOutcome::ProtocolError,
                        Some(err.code().to_string()),
                    ),
                }
            }
        };
    let body = payload.unwrap_or_default();
    state.audit_route(
        &origin,
        "/pipeline",
        RouteRecord {
            command: None,
            outcome,
            error_code,
            started,
            response_bytes: body.len(),
        },
    );
    json_bytes(status, body, trace_id.as_deref())
}

/// Handles `POST /stream`.
async fn handle_stream(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let started = Instant::now();
    let bytes = match body {
        Ok(bytes) => bytes,
        Err(rejection) => return body_rejected(&state, &headers, &rejection),
    };
    let origin = state.origin(&headers, bytes.len());
    let Some(permit) = state.try_admit() else {
        return busy(&state, &origin, "/stream", started);
    };
    let ToolCallParams {
        name,
        arguments,
    } = match serde_json::from_slice::<ToolCallParams>(&bytes) {
        Ok(params) => params,
        Err(_) => {
            let error = CommandError::validation("Stream request needs {name, arguments}");
            let body = serde_json::to_vec(&CommandResult::<Value>::failure(error))
                .unwrap_or_default();
            state.audit_route(
                &origin,
                "/stream",
                RouteRecord {
                    command: None,
                    outcome: RequestOutcome::ProtocolError,
                    error_code: Some(error_codes::VALIDATION_ERROR.to_string()),
                    started,
                    response_bytes: body.len(),
                },
            );
            return json_bytes(StatusCode::BAD_REQUEST, body, origin.correlation_id.as_deref());
        }
    };
    let commands = state.commands();
    let context = commands.service.context(&origin);
    let cancellation = context.cancellation.clone();
    let mut stream = commands.service.dispatcher().stream(&name, arguments, context).await;
    let (sender, receiver) = mpsc::channel::<Result<Event, Infallible>>(SSE_CAPACITY);
    let trace_id = origin.correlation_id.clone();
    let task_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut error_code = None;
        let mut response_bytes = 0;
        while let Some(chunk) = stream.next().await {
            if let StreamChunk::Error(failure) = &chunk {
                error_code = Some(failure.error.code.clone());
            }
            let data = serde_json::to_string(&chunk).unwrap_or_default();
            response_bytes += data.len();
            let event = Event::default().event(chunk.kind()).data(data);
            if sender.send(Ok(event)).await.is_err() {
                tracing::debug!("stream client disconnected");
                cancellation.cancel();
                break;
            }
        }
        task_state.audit_route(
            &origin,
            "/stream",
            RouteRecord {
                command: Some(name),
                outcome: if error_code.is_some() {
                    RequestOutcome::CommandError
                } else {
                    RequestOutcome::Ok
                },
                error_code,
                started,
                response_bytes,
            },
        );
        drop(permit);
    });
    let mut response = Sse::new(ReceiverStream::new(receiver)).into_response();
    insert_correlation(&mut response, trace_id.as_deref());
    response
}

/// Handles `GET /events`.
async fn handle_events(State(state): State<Arc<HttpState>>) -> Response {
    let ready = Event::default().event("ready").data(
        json!({
            "server": "conduit",
            "tools": state.commands().service.dispatcher().descriptors().len(),
        })
        .to_string(),
    );
    let updates = BroadcastStream::new(state.subscribe())
        .filter_map(|event| event.ok().map(|event| event.to_sse()));
    let events = tokio_stream::once(ready).chain(updates).map(Ok::<_, Infallible>);
    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

/// Handles `GET /health`.
async fn handle_health(State(state): State<Arc<HttpState>>) -> Response {
    let status = if state.inflight.available_permits() == 0 {
        "degraded"
    } else {
        "ok"
    };
    Json(json!({
        "status": status,
        "uptimeMs": duration_millis(state.started.elapsed()),
    }))
    .into_response()
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Answers a body the extractor refused (too large or unreadable).
fn body_rejected(state: &HttpState, headers: &HeaderMap, rejection: &BytesRejection) -> Response {
    let status = rejection.status();
    let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
        rpc_codes::REQUEST_TOO_LARGE
    } else {
        rpc_codes::INVALID_REQUEST
    };
    let origin = state.origin(headers, 0);
    let message = format!("request body rejected (limit {} bytes)", state.limits.max_body_bytes);
    let response = JsonRpcResponse::failure(Value::Null, code, message);
    let reply = state.commands().service.reject(&origin, &response);
    json_bytes(status, reply.body, origin.correlation_id.as_deref())
}

/// Answers a call refused at the in-flight limit.
fn busy(state: &HttpState, origin: &RequestOrigin, route: &str, started: Instant) -> Response {
    let error = CommandError::new(error_codes::RATE_LIMITED, "Server is at its in-flight limit")
        .with_retryable(true)
        .with_suggestion("Retry shortly");
    let body = serde_json::to_vec(&CommandResult::<Value>::failure(error)).unwrap_or_default();
    state.audit_route(
        origin,
        route,
        RouteRecord {
            command: None,
            outcome: RequestOutcome::ProtocolError,
            error_code: Some(error_codes::RATE_LIMITED.to_string()),
            started,
            response_bytes: body.len(),
        },
    );
    json_bytes(StatusCode::SERVICE_UNAVAILABLE, body, origin.correlation_id.as_deref())
}

/// Builds a JSON response with the correlation header.
fn json_bytes(status: StatusCode, body: Vec<u8>, trace_id: Option<&str>) -> Response {
    let mut response =
        (status, [(CONTENT_TYPE, HeaderValue::from_static("application/json"))], body)
            .into_response();
    insert_correlation(&mut response, trace_id);
    response
}

/// Echoes the trace id in the correlation header.
fn insert_correlation(response: &mut Response, trace_id: Option<&str>) {
    if let Some(value) = trace_id.and_then(|id| HeaderValue::from_str(id).ok()) {
        response.headers_mut().insert(HeaderName::from_static(CORRELATION_HEADER), value);
    }
}

/// Reads a header as text.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
