//! End-to-end tests for the line-delimited transport.
// crates/conduit-server/tests/stdio_transport.rs
// ============================================================================
// Module: Stdio Transport Tests
// Description: JSON-RPC lines over an in-memory duplex pipe.
// Purpose: Check framing, concurrency, cancellation, and stream notices.
// ============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::time::Duration;

use conduit_config::ConduitConfig;
use conduit_server::Server;
use conduit_server::ServerError;
use conduit_server::StdioLimits;
use conduit_server::serve_lines;
use serde_json::Value;
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::io::DuplexStream;
use tokio::io::Lines;
use tokio::io::ReadHalf;
use tokio::io::WriteHalf;
use tokio::task::JoinHandle;

mod common;
use crate::common::command_result;
use crate::common::rpc_call;

/// Client end of a served pipe.
struct Session {
    /// Request writer.
    writer: WriteHalf<DuplexStream>,
    /// Response reader.
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    /// Serving task.
    task: JoinHandle<Result<(), ServerError>>,
}

impl Session {
    async fn send(&mut self, message: &Value) {
        let mut line = serde_json::to_vec(message).unwrap();
        line.push(b'\n');
        self.writer.write_all(&line).await.unwrap();
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("no response within five seconds")
            .unwrap()
            .expect("pipe closed");
        serde_json::from_str(&line).unwrap()
    }
}

fn open(max_line_bytes: usize) -> Session {
    open_with(max_line_bytes, 8)
}

fn open_with(max_line_bytes: usize, max_inflight: usize) -> Session {
    let server = Server::demo(ConduitConfig::default()).unwrap();
    let (client, served) = tokio::io::duplex(64 * 1024);
    let (served_read, served_write) = tokio::io::split(served);
    let limits = StdioLimits {
        max_line_bytes,
        max_inflight,
    };
    let task = tokio::spawn(serve_lines(
        server.rpc_service(),
        BufReader::new(served_read),
        served_write,
        limits,
    ));
    let (client_read, writer) = tokio::io::split(client);
    Session {
        writer,
        lines: BufReader::new(client_read).lines(),
        task,
    }
}

#[tokio::test]
async fn echo_round_trip_over_lines() {
    let mut session = open(4_096);
    session.send(&rpc_call(1, "echo", json!({ "msg": "line" }))).await;
    let response = session.recv().await;
    assert_eq!(response["id"], 1);
    assert_eq!(command_result(&response)["data"], json!({ "msg": "line" }));
}

#[tokio::test]
async fn responses_are_correlated_by_id_not_order() {
    let mut session = open(4_096);
    session.send(&rpc_call(1, "demo.sleep", json!({ "ms": 300 }))).await;
    session.send(&rpc_call(2, "echo", json!({ "msg": "fast" }))).await;
    let first = session.recv().await;
    let second = session.recv().await;
    assert_eq!(first["id"], 2);
    assert_eq!(second["id"], 1);
    assert_eq!(command_result(&second)["data"]["sleptMs"], 300);
}

#[tokio::test]
async fn cancel_notification_stops_the_matching_request() {
    let mut session = open(4_096);
    session.send(&rpc_call(7, "demo.sleep", json!({ "ms": 60_000 }))).await;
    session
        .send(&json!({
            "jsonrpc": "2.0",
            "method": "notifications/cancelled",
            "params": { "requestId": 7 },
        }))
        .await;
    let response = session.recv().await;
    assert_eq!(response["id"], 7);
    assert_eq!(command_result(&response)["error"]["code"], "COMMAND_CANCELLED");
}

fn cancel_notice(request_id: u64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "notifications/cancelled",
        "params": { "requestId": request_id },
    })
}

#[tokio::test]
async fn saturated_session_answers_busy_and_still_cancels() {
    let mut session = open_with(4_096, 1);
    session.send(&rpc_call(1, "demo.sleep", json!({ "ms": 30_000 }))).await;
    session.send(&json!({ "jsonrpc": "2.0", "id": 2, "method": "ping" })).await;
    session.send(&cancel_notice(1)).await;
    let busy = session.recv().await;
    assert_eq!(busy["id"], 2);
    assert_eq!(busy["error"]["code"], -32_000);
    let cancelled = session.recv().await;
    assert_eq!(cancelled["id"], 1);
    assert_eq!(command_result(&cancelled)["error"]["code"], "COMMAND_CANCELLED");
    session.send(&json!({ "jsonrpc": "2.0", "id": 3, "method": "ping" })).await;
    assert_eq!(session.recv().await["id"], 3);
}

#[tokio::test]
async fn duplicate_inflight_id_is_rejected_and_original_stays_cancellable() {
    let mut session = open(4_096);
    session.send(&rpc_call(5, "demo.sleep", json!({ "ms": 30_000 }))).await;
    session.send(&rpc_call(5, "echo", json!({ "msg": "again" }))).await;
    let rejected = session.recv().await;
    assert_eq!(rejected["id"], 5);
    assert_eq!(rejected["error"]["code"], -32_600);
    session.send(&cancel_notice(5)).await;
    let cancelled = session.recv().await;
    assert_eq!(cancelled["id"], 5);
    assert_eq!(command_result(&cancelled)["error"]["code"], "COMMAND_CANCELLED");
}

#[tokio::test]
async fn oversized_line_is_rejected_and_session_continues() {
    let mut session = open(64);
    session.send_raw(&format!("{}\n", "x".repeat(200))).await;
    session.send(&json!({ "jsonrpc": "2.0", "id": "p", "method": "ping" })).await;
    let rejected = session.recv().await;
    assert_eq!(rejected["error"]["code"], -32_070);
    assert_eq!(rejected["id"], Value::Null);
    let pong = session.recv().await;
    assert_eq!(pong["id"], "p");
    assert_eq!(pong["result"], json!({}));
}

#[tokio::test]
async fn stream_notifications_precede_the_final_response() {
    let mut session = open(4_096);
    session
        .send(&json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/stream",
            "params": { "name": "demo.count", "arguments": { "to": 3 } },
        }))
        .await;
    let mut notifications = Vec::new();
    let response = loop {
        let message = session.recv().await;
        if message.get("id").is_some() {
            break message;
        }
        assert_eq!(message["method"], "notifications/chunk");
        assert_eq!(message["params"]["requestId"], 3);
        notifications.push(message["params"]["chunk"]["type"].as_str().unwrap().to_string());
    };
    assert_eq!(notifications.iter().filter(|kind| *kind == "data").count(), 3);
    assert_eq!(notifications.last().map(String::as_str), Some("complete"));
    assert_eq!(command_result(&response)["data"]["count"], 3);
}

#[tokio::test]
async fn end_of_input_drains_and_stops() {
    let mut session = open(4_096);
    session.send(&rpc_call(1, "math.add", json!({ "a": 1, "b": 1 }))).await;
    session.writer.shutdown().await.unwrap();
    let response = session.recv().await;
    assert_eq!(command_result(&response)["data"]["sum"], 2.0);
    let outcome = tokio::time::timeout(Duration::from_secs(5), session.task).await.unwrap();
    assert!(outcome.unwrap().is_ok());
}
