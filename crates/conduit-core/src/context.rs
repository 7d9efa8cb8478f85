// crates/conduit-core/src/context.rs
// ============================================================================
// Module: Command Context
// Description: Per-invocation trace, caller, cancellation, and deadline.
// Purpose: Carry ephemeral call state from transport to handler.
// Dependencies: rand, tokio
// ============================================================================

//! ## Overview
//! A [`CommandContext`] is created per call by the transport and discarded
//! when the call resolves. It carries a trace id, the caller identity when
//! known, a [`CancellationToken`], and an optional deadline covering the
//! whole call.
//!
//! Cancellation is cooperative: handlers and stream producers observe the
//! token at iteration boundaries. A handler that never checks the token
//! keeps running after the caller gives up and holds its resources until it
//! returns on its own.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rand::RngCore;
use rand::rngs::OsRng;
use tokio::sync::watch;
use tokio::time::Instant;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum allowed length for client-supplied trace identifiers.
pub const MAX_CLIENT_TRACE_ID_LENGTH: usize = 128;

// ============================================================================
// SECTION: Cancellation
// ============================================================================

/// Cloneable one-way cancellation signal.
///
/// # Invariants
/// - Once cancelled, a token stays cancelled.
/// - Every clone observes the same signal.
#[derive(Clone)]
pub struct CancellationToken {
    /// Shared signal; `true` once cancelled.
    signal: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    /// Creates an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            signal: Arc::new(signal),
        }
    }

    /// Triggers cancellation for every clone.
    pub fn cancel(&self) {
        self.signal.send_replace(true);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.signal.borrow()
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        let mut receiver = self.signal.subscribe();
        // The sender lives as long as `self`, so the wait cannot observe a
        // closed channel.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken").field("cancelled", &self.is_cancelled()).finish()
    }
}

// ============================================================================
// SECTION: Context
// ============================================================================

/// Transport that delivered a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Direct call inside the process.
    InProcess,
    /// Newline-delimited stream transport.
    Stdio,
    /// HTTP transport.
    Http,
}

impl TransportKind {
    /// Returns a stable label for logs and audit records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProcess => "in_process",
            Self::Stdio => "stdio",
            Self::Http => "http",
        }
    }
}

/// Ephemeral per-call state.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Trace identifier for correlating logs and results.
    pub trace_id: String,
    /// Caller identity when the transport knows it.
    pub caller: Option<String>,
    /// Transport that delivered the call.
    pub transport: TransportKind,
    /// Cooperative cancellation signal.
    pub cancellation: CancellationToken,
    /// Instant after which the call is abandoned.
    pub deadline: Option<Instant>,
}

impl CommandContext {
    /// Creates a context with a trace id and no deadline.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, transport: TransportKind) -> Self {
        Self {
            trace_id: trace_id.into(),
            caller: None,
            transport,
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Sets the caller identity.
    #[must_use]
    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    /// Sets a deadline relative to now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Caps the deadline at `timeout` from now, keeping an earlier one.
    #[must_use]
    pub fn with_deadline_cap(mut self, timeout: Duration) -> Self {
        let cap = Instant::now() + timeout;
        if self.deadline.is_none_or(|existing| existing > cap) {
            self.deadline = Some(cap);
        }
        self
    }

    /// Uses an existing cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Returns true once the caller cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Derives a context for a sub-call sharing cancellation and deadline.
    #[must_use]
    pub fn child(&self, suffix: &str) -> Self {
        Self {
            trace_id: format!("{}.{suffix}", self.trace_id),
            caller: self.caller.clone(),
            transport: self.transport,
            cancellation: self.cancellation.clone(),
            deadline: self.deadline,
        }
    }

    /// Returns time left before the deadline, if one is set.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

/// Converts a duration to whole milliseconds, saturating at `u64::MAX`.
#[must_use]
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// SECTION: Trace Ids
// ============================================================================

/// Boot-scoped trace id generator.
///
/// # Invariants
/// - Issued identifiers are unique within the process lifetime.
#[derive(Debug)]
pub struct TraceIdGenerator {
    /// Prefix included in every issued id.
    prefix: &'static str,
    /// Random per-process component.
    boot_id: u64,
    /// Monotonic sequence.
    counter: AtomicU64,
}

impl TraceIdGenerator {
    /// Creates a generator with the given prefix.
    #[must_use]
    pub fn new(prefix: &'static str) -> Self {
        let mut bytes = [0u8; 8];
        OsRng.fill_bytes(&mut bytes);
        Self {
            prefix,
            boot_id: u64::from_be_bytes(bytes),
            counter: AtomicU64::new(1),
        }
    }

    /// Issues a new trace id.
    #[must_use]
    pub fn issue(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{:016x}-{:016x}", self.prefix, self.boot_id, seq)
    }

    /// Returns a sanitized client id when valid, otherwise a fresh id.
    #[must_use]
    pub fn issue_or_accept(&self, client_id: Option<&str>) -> String {
        client_id.and_then(sanitize_client_trace_id).unwrap_or_else(|| self.issue())
    }
}

/// Sanitizes a client-supplied trace id using HTTP token rules.
///
/// Returns `None` when the value is empty, too long, or contains characters
/// outside the RFC 7230 token set.
#[must_use]
pub fn sanitize_client_trace_id(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_CLIENT_TRACE_ID_LENGTH {
        return None;
    }
    trimmed.chars().all(is_tchar).then(|| trimmed.to_string())
}

/// Returns true when the character is a valid HTTP token character.
const fn is_tchar(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || matches!(
            ch,
            '!' | '#'
                | '$'
                | '%'
                | '&'
                | '\''
                | '*'
                | '+'
                | '-'
                | '.'
                | '^'
                | '_'
                | '`'
                | '|'
                | '~'
        )
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use std::time::Duration;

    use super::CancellationToken;
    use super::TraceIdGenerator;
    use super::sanitize_client_trace_id;

    #[test]
    fn issued_trace_ids_are_unique() {
        let generator = TraceIdGenerator::new("trace");
        let first = generator.issue();
        let second = generator.issue();
        assert_ne!(first, second);
        assert!(first.starts_with("trace-"));
    }

    #[test]
    fn client_trace_ids_are_sanitized() {
        assert_eq!(sanitize_client_trace_id(" req-42 ").as_deref(), Some("req-42"));
        assert_eq!(sanitize_client_trace_id("has space"), None);
        assert_eq!(sanitize_client_trace_id(""), None);
        assert_eq!(sanitize_client_trace_id(&"a".repeat(129)), None);
        assert_eq!(sanitize_client_trace_id("naïve"), None);
    }

    #[tokio::test]
    async fn cancellation_reaches_every_clone() {
        let token = CancellationToken::new();
        let observer = token.clone();
        let waiter = tokio::spawn(async move { observer.cancelled().await });
        assert!(!token.is_cancelled());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(token.is_cancelled());
    }
}
