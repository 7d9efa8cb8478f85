// crates/conduit-server/tests/common/mod.rs
// ============================================================================
// Module: Common Test Fixtures
// Description: Helpers that boot the demo server on loopback.
// Purpose: Drive transports end to end against real sockets and pipes.
// Dependencies: conduit-server, conduit-config, reqwest, tokio
// ============================================================================

//! ## Overview
//! [`spawn_http`] binds an ephemeral loopback port, serves the demo command
//! set on it, and returns the base URL together with an in-process client
//! sharing the same dispatcher.

#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Shared test helpers may be unused in some cases."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use conduit_config::ConduitConfig;
use conduit_config::ServerTransport;
use conduit_server::HttpState;
use conduit_server::InProcessClient;
use conduit_server::Server;
use conduit_server::http::serve_http;
use serde_json::Value;
use serde_json::json;
use tokio::net::TcpListener;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Running HTTP server handle.
pub struct TestServer {
    /// Base URL, without trailing slash.
    pub base: String,
    /// In-process client over the same dispatcher.
    pub client: InProcessClient,
    /// HTTP client.
    pub http: reqwest::Client,
    /// Route state shared with the listener.
    pub state: Arc<HttpState>,
}

impl TestServer {
    /// Returns the absolute URL of a route.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    /// Posts a JSON-RPC `tools/call` and returns the raw response.
    pub async fn call(&self, name: &str, arguments: Value) -> reqwest::Response {
        self.http
            .post(self.url("/rpc"))
            .json(&rpc_call(1, name, arguments))
            .send()
            .await
            .unwrap()
    }
}

/// Returns a config serving HTTP on an ephemeral loopback port.
pub fn http_config() -> ConduitConfig {
    let mut config = ConduitConfig::default();
    config.server.transport = ServerTransport::Http;
    config.server.bind = "127.0.0.1:0".to_string();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config
}

/// Boots the demo server with the given config.
pub async fn spawn_http(config: ConduitConfig) -> TestServer {
    let server = Server::demo(config).unwrap();
    let client = server.in_process();
    let state = server.http_state();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve_http(listener, Arc::clone(&state)));
    TestServer {
        base: format!("http://{addr}"),
        client,
        http: reqwest::Client::builder().timeout(Duration::from_secs(10)).build().unwrap(),
        state,
    }
}

/// Builds a JSON-RPC `tools/call` envelope.
pub fn rpc_call(id: u64, name: &str, arguments: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": { "name": name, "arguments": arguments },
    })
}

/// Decodes the command result carried by a `tools/call` response.
pub fn command_result(response: &Value) -> Value {
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    serde_json::from_str(text).unwrap()
}

/// Splits an SSE body into `(event, data)` pairs.
pub fn sse_events(body: &str) -> Vec<(String, String)> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut data = Vec::new();
            for line in block.lines() {
                if let Some(name) = line.strip_prefix("event:") {
                    event = Some(name.trim().to_string());
                } else if let Some(payload) = line.strip_prefix("data:") {
                    data.push(payload.trim_start().to_string());
                }
            }
            event.map(|event| (event, data.join("\n")))
        })
        .collect()
}
