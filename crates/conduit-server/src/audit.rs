// crates/conduit-server/src/audit.rs
// ============================================================================
// Module: Request Audit Logging
// Description: Structured audit events for transport request handling.
// Purpose: Emit one JSON line per handled request without payload contents.
// Dependencies: conduit-config, serde
// ============================================================================

//! ## Overview
//! Every transport records one [`RequestAuditEvent`] per request it answers.
//! Events carry sizes, codes, and timings but never command input or output,
//! so they are safe to ship to a shared log pipeline. Sinks are selected from
//! `[server.audit]`: stderr by default, an append-only file when a path is
//! configured, and a no-op sink when auditing is disabled.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use conduit_config::AuditConfig;
use serde::Serialize;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Outcome label of a handled request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOutcome {
    /// Protocol-level success with a successful command result.
    Ok,
    /// Protocol-level success carrying a failed command result.
    CommandError,
    /// Protocol-level failure (parse, method, params, limits).
    ProtocolError,
}

/// Request audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct RequestAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Trace identifier assigned to the request.
    pub trace_id: Option<String>,
    /// Transport label.
    pub transport: &'static str,
    /// Method or route name.
    pub method: String,
    /// Command name when the request named one.
    pub command: Option<String>,
    /// Request outcome.
    pub outcome: RequestOutcome,
    /// Command error code or JSON-RPC error code when present.
    pub error_code: Option<String>,
    /// Time spent handling the request.
    pub duration_ms: u64,
    /// Request body size in bytes.
    pub request_bytes: usize,
    /// Response body size in bytes.
    pub response_bytes: usize,
    /// Caller identity when provided.
    pub caller: Option<String>,
}

/// Inputs required to construct an audit event.
pub struct RequestAuditEventParams {
    /// Trace identifier assigned to the request.
    pub trace_id: Option<String>,
    /// Transport label.
    pub transport: &'static str,
    /// Method or route name.
    pub method: String,
    /// Command name when the request named one.
    pub command: Option<String>,
    /// Request outcome.
    pub outcome: RequestOutcome,
    /// Command error code or JSON-RPC error code when present.
    pub error_code: Option<String>,
    /// Time spent handling the request.
    pub duration_ms: u64,
    /// Request body size in bytes.
    pub request_bytes: usize,
    /// Response body size in bytes.
    pub response_bytes: usize,
    /// Caller identity when provided.
    pub caller: Option<String>,
}

impl RequestAuditEvent {
    /// Creates a new audit event with a consistent timestamp.
    #[must_use]
    pub fn new(params: RequestAuditEventParams) -> Self {
        let timestamp_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self {
            event: "conduit_request",
            timestamp_ms,
            trace_id: params.trace_id,
            transport: params.transport,
            method: params.method,
            command: params.command,
            outcome: params.outcome,
            error_code: params.error_code,
            duration_ms: params.duration_ms,
            request_bytes: params.request_bytes,
            response_bytes: params.response_bytes,
            caller: params.caller,
        }
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink for request events.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: &RequestAuditEvent);
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record(&self, event: &RequestAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that logs JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: &RequestAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &RequestAuditEvent) {}
}

/// Builds the sink selected by configuration.
///
/// # Errors
///
/// Returns an error when the configured audit file cannot be opened.
pub fn sink_from_config(config: &AuditConfig) -> io::Result<Arc<dyn AuditSink>> {
    if !config.enabled {
        return Ok(Arc::new(NoopAuditSink));
    }
    match config.path.as_deref() {
        Some(path) => Ok(Arc::new(FileAuditSink::new(Path::new(path.trim()))?)),
        None => Ok(Arc::new(StderrAuditSink)),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
