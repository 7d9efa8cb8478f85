// crates/conduit-server/src/lib.rs
// ============================================================================
// Module: Conduit Server Library
// Description: Transport adapters over the Conduit command dispatcher.
// Purpose: Serve commands in-process, over stdio, and over HTTP.
// Dependencies: conduit-core, conduit-config, axum, tokio, tracing
// ============================================================================

//! ## Overview
//! Every transport routes through one [`conduit_core::Dispatcher`], so a
//! command returns the same result whichever way it was called. Stdio and
//! HTTP share the JSON-RPC service in [`jsonrpc`]; the in-process client
//! skips serialization entirely.
//!
//! Security posture: request bodies, headers, and lines are untrusted and
//! size-bounded before parsing.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod demo;
pub mod error;
pub mod http;
pub mod in_process;
pub mod jsonrpc;
pub mod logging;
pub mod server;
pub mod stdio;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditSink;
pub use audit::RequestAuditEvent;
pub use audit::RequestOutcome;
pub use error::ServerError;
pub use http::HttpState;
pub use in_process::InProcessClient;
pub use jsonrpc::RpcService;
pub use logging::init_logging;
pub use server::Server;
pub use server::retry_policy;
pub use stdio::StdioLimits;
pub use stdio::serve_lines;
