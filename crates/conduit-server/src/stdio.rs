// crates/conduit-server/src/stdio.rs
// ============================================================================
// Module: Stdio Transport
// Description: Newline-delimited JSON-RPC over a byte stream pair.
// Purpose: Serve co-located tool hosts over stdin/stdout.
// Dependencies: tokio, crate::jsonrpc
// ============================================================================

//! ## Overview
//! Each input line is one request envelope and each output line is one
//! response or notification. Requests run concurrently up to the in-flight
//! limit; a single writer task owns the output so lines never interleave.
//! Responses may arrive out of request order and are correlated by `id`.
//! The reader never waits on the in-flight limit: requests beyond it are
//! answered with `-32000 server busy` and a request id already in flight is
//! rejected with `-32600`.
//!
//! `notifications/cancelled {requestId}` cancels the matching in-flight
//! request. Diagnostics never touch the output stream.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use async_trait::async_trait;
use conduit_core::CancellationToken;
use conduit_core::StreamChunk;
use conduit_core::TransportKind;
use serde_json::Value;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::sync::Semaphore;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::error::ServerError;
use crate::jsonrpc::CANCEL_NOTIFICATION;
use crate::jsonrpc::CancelParams;
use crate::jsonrpc::ChunkSink;
use crate::jsonrpc::JsonRpcNotification;
use crate::jsonrpc::JsonRpcResponse;
use crate::jsonrpc::RequestOrigin;
use crate::jsonrpc::RpcService;
use crate::jsonrpc::rpc_codes;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Outbound lines buffered ahead of the writer.
const OUTBOUND_CAPACITY: usize = 64;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Limits applied to a line-delimited session.
#[derive(Debug, Clone, Copy)]
pub struct StdioLimits {
    /// Longest accepted request line, newline excluded.
    pub max_line_bytes: usize,
    /// Requests running at once.
    pub max_inflight: usize,
}

/// One framed input line.
enum Line {
    /// Input closed.
    Eof,
    /// Line exceeded the limit and was discarded.
    TooLong,
    /// Line content without the trailing newline.
    Complete(Vec<u8>),
}

/// In-flight request tokens keyed by encoded request id.
type InflightMap = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Chunk sink writing `notifications/chunk` lines.
struct LineChunks {
    /// Writer queue.
    outbound: mpsc::Sender<Vec<u8>>,
}

#[async_trait]
impl ChunkSink for LineChunks {
    async fn push(&self, request_id: &Value, chunk: &StreamChunk) {
        if let Ok(line) = serde_json::to_vec(&JsonRpcNotification::chunk(request_id, chunk)) {
            let _ = self.outbound.send(line).await;
        }
    }
}

// ============================================================================
// SECTION: Serving
// ============================================================================

/// Serves requests over the process stdin and stdout.
///
/// # Errors
///
/// Returns [`ServerError::Transport`] when reading or writing fails.
pub async fn serve_stdio(service: Arc<RpcService>, limits: StdioLimits) -> Result<(), ServerError> {
    serve_lines(service, BufReader::new(tokio::io::stdin()), tokio::io::stdout(), limits).await
}

/// Serves requests over any line-oriented reader and writer until the reader
/// reaches end of input and every accepted request has been answered.
///
/// # Errors
///
/// Returns [`ServerError::Transport`] when reading or writing fails.
pub async fn serve_lines<R, W>(
    service: Arc<RpcService>,
    mut reader: R,
    writer: W,
    limits: StdioLimits,
) -> Result<(), ServerError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbound, queue) = mpsc::channel::<Vec<u8>>(OUTBOUND_CAPACITY);
    let writer_task = tokio::spawn(write_lines(writer, queue));
    let permits = Arc::new(Semaphore::new(limits.max_inflight.max(1)));
    let inflight: InflightMap = Arc::new(Mutex::new(HashMap::new()));
    let mut tasks = JoinSet::new();
    loop {
        let line = match read_line(&mut reader, limits.max_line_bytes).await? {
            Line::Eof => break,
            Line::TooLong => {
                let response = JsonRpcResponse::failure(
                    Value::Null,
                    rpc_codes::REQUEST_TOO_LARGE,
                    "request line too large",
                );
                let origin = RequestOrigin::new(TransportKind::Stdio);
                send(&outbound, service.reject(&origin, &response).body).await?;
                continue;
            }
            Line::Complete(line) => line,
        };
        if line.trim_ascii().is_empty() {
            continue;
        }
        let mut origin = RequestOrigin::new(TransportKind::Stdio);
        origin.request_bytes = line.len();
        let request = match RpcService::parse(&line) {
            Ok(request) => request,
            Err(response) => {
                send(&outbound, service.reject(&origin, &response).body).await?;
                continue;
            }
        };
        if request.method == CANCEL_NOTIFICATION {
            cancel_request(&inflight, request.params);
            continue;
        }
        let key = request.id.as_ref().map(Value::to_string);
        if let Some(key) = &key
            && lock(&inflight).contains_key(key)
        {
            let response = JsonRpcResponse::failure(
                request.id.clone().unwrap_or(Value::Null),
                rpc_codes::INVALID_REQUEST,
                "request id already in flight",
            );
            send(&outbound, service.reject(&origin, &response).body).await?;
            continue;
        }
        let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
            match request.id {
                Some(id) => {
                    let response =
                        JsonRpcResponse::failure(id, rpc_codes::SERVER_BUSY, "server busy");
                    send(&outbound, service.reject(&origin, &response).body).await?;
                }
                None => {
                    tracing::debug!(method = %request.method, "dropping notification while busy");
                }
            }
            continue;
        };
        if let Some(key) = &key {
            lock(&inflight).insert(key.clone(), origin.cancellation.clone());
        }
        let service = Arc::clone(&service);
        let inflight = Arc::clone(&inflight);
        let outbound = outbound.clone();
        tasks.spawn(async move {
            let sink = LineChunks {
                outbound: outbound.clone(),
            };
            if let Some(reply) = service.handle(request, origin, &sink).await {
                let _ = outbound.send(reply.body).await;
            }
            if let Some(key) = key {
                lock(&inflight).remove(&key);
            }
            drop(permit);
        });
        while tasks.try_join_next().is_some() {}
    }
    while tasks.join_next().await.is_some() {}
    drop(outbound);
    writer_task
        .await
        .map_err(|_| ServerError::Transport("stdio writer task failed".to_string()))?
}

/// Cancels the request named by a `notifications/cancelled` payload.
fn cancel_request(inflight: &InflightMap, params: Option<Value>) {
    let Some(params) =
        params.and_then(|params| serde_json::from_value::<CancelParams>(params).ok())
    else {
        tracing::debug!("ignoring malformed cancel notification");
        return;
    };
    let key = params.request_id.to_string();
    match lock(inflight).get(&key) {
        Some(token) => {
            tracing::info!(request_id = %key, "request cancelled by client");
            token.cancel();
        }
        None => tracing::debug!(request_id = %key, "cancel for unknown request"),
    }
}

/// Locks the in-flight map, recovering from poisoning.
fn lock(
    inflight: &InflightMap,
) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
    inflight.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// SECTION: Framing Helpers
// ============================================================================

/// Reads one newline-terminated line of at most `max_bytes` bytes.
async fn read_line<R>(reader: &mut R, max_bytes: usize) -> Result<Line, ServerError>
where
    R: AsyncBufRead + Unpin,
{
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX).saturating_add(1);
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(limit)
        .read_until(b'\n', &mut buf)
        .await
        .map_err(|_| ServerError::Transport("stdio read failed".to_string()))?;
    if read == 0 {
        return Ok(Line::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        return Ok(Line::Complete(buf));
    }
    if buf.len() <= max_bytes {
        return Ok(Line::Complete(buf));
    }
    loop {
        let mut discarded = Vec::new();
        let read = (&mut *reader)
            .take(limit)
            .read_until(b'\n', &mut discarded)
            .await
            .map_err(|_| ServerError::Transport("stdio read failed".to_string()))?;
        if read == 0 || discarded.last() == Some(&b'\n') {
            return Ok(Line::TooLong);
        }
    }
}

/// Queues one outbound line.
async fn send(outbound: &mpsc::Sender<Vec<u8>>, line: Vec<u8>) -> Result<(), ServerError> {
    outbound
        .send(line)
        .await
        .map_err(|_| ServerError::Transport("stdio writer closed".to_string()))
}

/// Writes queued lines until every sender is dropped.
async fn write_lines<W>(
    mut writer: W,
    mut queue: mpsc::Receiver<Vec<u8>>,
) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = queue.recv().await {
        line.push(b'\n');
        writer
            .write_all(&line)
            .await
            .map_err(|_| ServerError::Transport("stdio write failed".to_string()))?;
        writer.flush().await.map_err(|_| ServerError::Transport("stdio write failed".to_string()))?;
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use std::io::Cursor;

    use tokio::io::BufReader;

    use super::Line;
    use super::read_line;

    #[tokio::test]
    async fn oversized_line_is_discarded_and_reading_resumes() {
        let input = format!("{}\n{{\"ok\":1}}\n", "x".repeat(40));
        let mut reader = BufReader::with_capacity(8, Cursor::new(input.into_bytes()));
        assert!(matches!(read_line(&mut reader, 16).await.unwrap(), Line::TooLong));
        match read_line(&mut reader, 16).await.unwrap() {
            Line::Complete(line) => assert_eq!(line, b"{\"ok\":1}"),
            _ => unreachable!("expected a complete line"),
        }
        assert!(matches!(read_line(&mut reader, 16).await.unwrap(), Line::Eof));
    }

    #[tokio::test]
    async fn line_at_limit_is_accepted() {
        let mut reader = BufReader::new(Cursor::new(b"abcd\n".to_vec()));
        match read_line(&mut reader, 4).await.unwrap() {
            Line::Complete(line) => assert_eq!(line, b"abcd"),
            _ => unreachable!("expected a complete line"),
        }
    }
}
