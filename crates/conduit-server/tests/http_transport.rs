//! End-to-end tests for the HTTP transport.
// crates/conduit-server/tests/http_transport.rs
// ============================================================================
// Module: HTTP Transport Tests
// Description: Routes, limits, and push events over a loopback socket.
// Purpose: Check HTTP results match in-process results and limits hold.
// ============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::time::Duration;

use conduit_core::RetryPolicy;
use conduit_server::Server;
use conduit_server::demo::demo_commands;
use serde_json::Value;
use serde_json::json;

mod common;
use crate::common::TestServer;
use crate::common::command_result;
use crate::common::http_config;
use crate::common::rpc_call;
use crate::common::spawn_http;
use crate::common::sse_events;

/// Reads an open SSE response until the accumulated text contains `needle`.
async fn read_until(response: &mut reqwest::Response, buffer: &mut String, needle: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !buffer.contains(needle) {
            let chunk = response.chunk().await.unwrap().expect("event stream closed");
            buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    })
    .await
    .unwrap();
}

async fn wait_for_degraded(server: &TestServer) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let health: Value =
                server.http.get(server.url("/health")).send().await.unwrap().json().await.unwrap();
            if health["status"] == "degraded" {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

// ============================================================================
// SECTION: Calls
// ============================================================================

#[tokio::test]
async fn health_reports_ok_and_uptime() {
    let server = spawn_http(http_config()).await;
    let response = server.http.get(server.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["uptimeMs"].is_u64());
}

#[tokio::test]
async fn http_and_in_process_return_identical_data() {
    let server = spawn_http(http_config()).await;
    let input = json!({ "msg": "same bytes" });
    let local = server.client.call("echo", input.clone()).await;
    let response = server.call("echo", input).await;
    assert_eq!(response.status(), 200);
    let remote = command_result(&response.json::<Value>().await.unwrap());
    assert_eq!(remote["success"], true);
    assert_eq!(
        serde_json::to_vec(&remote["data"]).unwrap(),
        serde_json::to_vec(local.data().unwrap()).unwrap()
    );
}

#[tokio::test]
async fn correlation_id_is_echoed_and_traced() {
    let server = spawn_http(http_config()).await;
    let response = server
        .http
        .post(server.url("/rpc"))
        .header("x-correlation-id", "client-abc")
        .json(&rpc_call(9, "math.add", json!({ "a": 2, "b": 5 })))
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()["x-correlation-id"], "client-abc");
    let result = command_result(&response.json::<Value>().await.unwrap());
    assert_eq!(result["data"]["sum"], 7.0);
    assert_eq!(result["metadata"]["traceId"], "client-abc");
}

#[tokio::test]
async fn timeout_header_bounds_the_call() {
    let server = spawn_http(http_config()).await;
    let response = server
        .http
        .post(server.url("/rpc"))
        .header("x-conduit-timeout-ms", "50")
        .json(&rpc_call(1, "demo.sleep", json!({ "ms": 5_000 })))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["isError"], true);
    assert_eq!(command_result(&body)["error"]["code"], "TIMEOUT");
}

#[tokio::test]
async fn protocol_errors_map_to_http_status() {
    let server = spawn_http(http_config()).await;
    let garbage = server.http.post(server.url("/rpc")).body("{nope").send().await.unwrap();
    assert_eq!(garbage.status(), 400);
    let body: Value = garbage.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32_700);

    let notification = server
        .http
        .post(server.url("/rpc"))
        .json(&json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
        .send()
        .await
        .unwrap();
    assert_eq!(notification.status(), 202);
}

// ============================================================================
// SECTION: Limits
// ============================================================================

#[tokio::test]
async fn oversized_body_is_rejected_with_413() {
    let mut config = http_config();
    config.server.max_body_bytes = 512;
    let server = spawn_http(config).await;
    let padding = "x".repeat(2_048);
    let response = server.call("echo", json!({ "msg": padding })).await;
    assert_eq!(response.status(), 413);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32_070);
}

#[tokio::test]
async fn saturated_server_answers_503() {
    let mut config = http_config();
    config.server.max_inflight = 1;
    let server = spawn_http(config).await;
    let http = server.http.clone();
    let url = server.url("/rpc");
    let slow = tokio::spawn(async move {
        http.post(url).json(&rpc_call(1, "demo.sleep", json!({ "ms": 3_000 }))).send().await
    });
    wait_for_degraded(&server).await;
    let response = server.call("echo", json!({ "msg": "late" })).await;
    assert_eq!(response.status(), 503);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32_000);
    slow.abort();
}

// ============================================================================
// SECTION: Batch and Streaming
// ============================================================================

#[tokio::test]
async fn batch_route_returns_results_and_summary() {
    let server = spawn_http(http_config()).await;
    let response = server
        .http
        .post(server.url("/batch"))
        .json(&json!({
            "commands": [
                { "id": "a", "command": "echo", "input": { "msg": "one" } },
                { "id": "b", "command": "math.add", "input": { "a": 1, "b": 2 } },
                { "id": "c", "command": "nope" },
            ],
            "options": { "continueOnError": true },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["summary"]["total"], 3);
    assert_eq!(body["summary"]["succeeded"], 2);
    assert_eq!(body["summary"]["failed"], 1);
    assert_eq!(body["results"][0]["id"], "a");
    assert_eq!(body["results"][2]["error"]["code"], "COMMAND_NOT_FOUND");
}

#[tokio::test]
async fn malformed_batch_is_a_bad_request() {
    let server = spawn_http(http_config()).await;
    let response =
        server.http.post(server.url("/batch")).json(&json!({ "items": [] })).send().await.unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "INVALID_BATCH_REQUEST");
}

#[tokio::test]
async fn pipeline_route_chains_steps_and_skips_after_failure() {
    let server = spawn_http(http_config()).await;
    let response = server
        .http
        .post(server.url("/pipeline"))
        .json(&json!({
            "id": "calc",
            "input": { "bonus": 4 },
            "steps": [
                { "command": "math.add", "input": { "a": 1, "b": "$input.bonus" }, "as": "base" },
                { "command": "math.add", "input": { "a": "$steps.base.sum", "b": 10 } },
                { "command": "nope" },
                { "command": "echo", "input": { "msg": "never" } },
            ],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["id"], "calc");
    assert_eq!(body["data"], json!({ "sum": 15.0 }));
    assert_eq!(body["steps"][2]["status"], "failure");
    assert_eq!(body["steps"][2]["error"]["code"], "COMMAND_NOT_FOUND");
    assert_eq!(body["steps"][3]["status"], "skipped");
    assert_eq!(body["steps"][3]["error"]["code"], "COMMAND_SKIPPED");
    assert_eq!(body["metadata"]["completedSteps"], 2);
    assert_eq!(body["metadata"]["totalSteps"], 4);
}

#[tokio::test]
async fn pipeline_over_the_configured_step_limit_is_a_bad_request() {
    let mut config = http_config();
    config.pipeline.max_steps = 1;
    let server = spawn_http(config).await;
    let response = server
        .http
        .post(server.url("/pipeline"))
        .json(&json!({
            "steps": [
                { "command": "echo", "input": { "msg": "a" } },
                { "command": "echo", "input": { "msg": "b" } },
            ],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "INVALID_PIPELINE_REQUEST");
}

#[tokio::test]
async fn stream_route_emits_typed_events_ending_in_complete() {
    let server = spawn_http(http_config()).await;
    let response = server
        .http
        .post(server.url("/stream"))
        .json(&json!({ "name": "demo.count", "arguments": { "to": 3 } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let events = sse_events(&response.text().await.unwrap());
    let kinds: Vec<&str> = events.iter().map(|(event, _)| event.as_str()).collect();
    assert_eq!(kinds.iter().filter(|kind| **kind == "data").count(), 3);
    assert_eq!(kinds.last(), Some(&"complete"));
    let (_, last) = events.last().unwrap();
    let complete: Value = serde_json::from_str(last).unwrap();
    assert_eq!(complete["type"], "complete");
}

#[tokio::test]
async fn stream_route_reports_unknown_commands_as_error_event() {
    let server = spawn_http(http_config()).await;
    let response = server
        .http
        .post(server.url("/stream"))
        .json(&json!({ "name": "demo.missing", "arguments": {} }))
        .send()
        .await
        .unwrap();
    let events = sse_events(&response.text().await.unwrap());
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "error");
    let chunk: Value = serde_json::from_str(&events[0].1).unwrap();
    assert_eq!(chunk["error"]["code"], "COMMAND_NOT_FOUND");
}

#[tokio::test]
async fn events_channel_carries_ready_and_rpc_stream_chunks() {
    let server = spawn_http(http_config()).await;
    let mut events = server.http.get(server.url("/events")).send().await.unwrap();
    assert_eq!(events.status(), 200);
    let mut buffer = String::new();
    read_until(&mut events, &mut buffer, "ready").await;

    let response = server
        .http
        .post(server.url("/rpc"))
        .json(&json!({
            "jsonrpc": "2.0",
            "id": "s-1",
            "method": "tools/stream",
            "params": { "name": "demo.count", "arguments": { "to": 2 } },
        }))
        .send()
        .await
        .unwrap();
    let result = command_result(&response.json::<Value>().await.unwrap());
    assert_eq!(result["data"]["count"], 2);

    read_until(&mut events, &mut buffer, "\"type\":\"complete\"").await;
    let pushed: Vec<(String, String)> =
        sse_events(&buffer).into_iter().filter(|(event, _)| event == "stream_chunk").collect();
    assert!(!pushed.is_empty());
    let first: Value = serde_json::from_str(&pushed[0].1).unwrap();
    assert_eq!(first["requestId"], "s-1");
}

#[tokio::test]
async fn replacing_commands_announces_tools_changed() {
    let server = spawn_http(http_config()).await;
    let mut events = server.http.get(server.url("/events")).send().await.unwrap();
    let mut buffer = String::new();
    read_until(&mut events, &mut buffer, "ready").await;

    let mut commands = demo_commands(RetryPolicy::default()).unwrap();
    commands.retain(|definition| definition.name() == "echo");
    let narrowed = Server::from_config(http_config(), commands).unwrap();
    narrowed.publish_to(&server.state);
    read_until(&mut events, &mut buffer, "tools_changed").await;

    let removed = server.call("math.add", json!({ "a": 1, "b": 2 })).await;
    let removed = command_result(&removed.json::<Value>().await.unwrap());
    assert_eq!(removed["error"]["code"], "COMMAND_NOT_FOUND");
    let kept = server.call("echo", json!({ "msg": "still here" })).await;
    let kept = command_result(&kept.json::<Value>().await.unwrap());
    assert_eq!(kept["data"], json!({ "msg": "still here" }));
}
