// crates/conduit-core/src/middleware.rs
// ============================================================================
// Module: Middleware Chain
// Description: Ordered wrappers composed around registry dispatch.
// Purpose: Add logging, timing, tracing, and rate limiting without touching
//          handlers.
// Dependencies: async-trait, serde_json, tokio, tracing, crate::registry
// ============================================================================

//! ## Overview
//! A [`Middleware`] receives the call and a [`Next`] continuation. `Next` is
//! consumed by [`Next::run`], so a middleware can invoke the rest of the
//! chain at most once; it may pass the result through, augment it, or
//! return its own result without calling `next`. The first middleware in
//! the chain is the outermost.
//!
//! Streaming calls traverse the same chain through
//! [`Middleware::handle_stream`], which passes through by default.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use crate::context::CommandContext;
use crate::context::duration_millis;
use crate::error::CommandError;
use crate::registry::CommandRegistry;
use crate::result::CommandResult;
use crate::streaming::ChunkStream;

// ============================================================================
// SECTION: Contract
// ============================================================================

/// One command invocation travelling through the chain.
#[derive(Debug, Clone)]
pub struct CommandCall {
    /// Command name.
    pub name: String,
    /// Raw input.
    pub input: Value,
    /// Per-call context.
    pub context: CommandContext,
}

/// Wrapper around registry dispatch.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Stable label for logs.
    fn name(&self) -> &'static str;

    /// Handles a single-result call.
    async fn handle(&self, call: CommandCall, next: Next<'_>) -> CommandResult;

    /// Handles a streaming call. Passes through by default.
    async fn handle_stream(&self, call: CommandCall, next: NextStream<'_>) -> ChunkStream {
        next.run(call).await
    }
}

/// Remainder of the chain for a single-result call.
pub struct Next<'a> {
    /// Middleware still to run.
    chain: &'a [Arc<dyn Middleware>],
    /// Terminal dispatch target.
    registry: &'a CommandRegistry,
}

impl<'a> Next<'a> {
    /// Creates a continuation over a chain.
    pub(crate) const fn new(
        chain: &'a [Arc<dyn Middleware>],
        registry: &'a CommandRegistry,
    ) -> Self {
        Self {
            chain,
            registry,
        }
    }

    /// Runs the rest of the chain, ending in the registry.
    pub async fn run(self, call: CommandCall) -> CommandResult {
        match self.chain.split_first() {
            Some((head, rest)) => head.handle(call, Next::new(rest, self.registry)).await,
            None => self.registry.execute(&call.name, call.input, call.context).await,
        }
    }
}

/// Remainder of the chain for a streaming call.
pub struct NextStream<'a> {
    /// Middleware still to run.
    chain: &'a [Arc<dyn Middleware>],
    /// Terminal dispatch target.
    registry: &'a CommandRegistry,
}

impl<'a> NextStream<'a> {
    /// Creates a continuation over a chain.
    pub(crate) const fn new(
        chain: &'a [Arc<dyn Middleware>],
        registry: &'a CommandRegistry,
    ) -> Self {
        Self {
            chain,
            registry,
        }
    }

    /// Runs the rest of the chain, ending in the registry.
    pub async fn run(self, call: CommandCall) -> ChunkStream {
        match self.chain.split_first() {
            Some((head, rest)) => {
                head.handle_stream(call, NextStream::new(rest, self.registry)).await
            }
            None => self.registry.execute_stream(&call.name, call.input, call.context).await,
        }
    }
}

// ============================================================================
// SECTION: Logging
// ============================================================================

/// Logs every call with its outcome through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn handle(&self, call: CommandCall, next: Next<'_>) -> CommandResult {
        let command = call.name.clone();
        let trace_id = call.context.trace_id.clone();
        let transport = call.context.transport.as_str();
        let started = Instant::now();
        tracing::debug!(command = %command, trace_id = %trace_id, transport, "command started");
        let result = next.run(call).await;
        let duration_ms = duration_millis(started.elapsed());
        match result.error() {
            None => tracing::info!(
                command = %command,
                trace_id = %trace_id,
                transport,
                duration_ms,
                "command succeeded"
            ),
            Some(error) => tracing::warn!(
                command = %command,
                trace_id = %trace_id,
                transport,
                duration_ms,
                code = %error.code,
                "command failed"
            ),
        }
        result
    }

    async fn handle_stream(&self, call: CommandCall, next: NextStream<'_>) -> ChunkStream {
        tracing::info!(
            command = %call.name,
            trace_id = %call.context.trace_id,
            transport = call.context.transport.as_str(),
            "stream opened"
        );
        next.run(call).await
    }
}

// ============================================================================
// SECTION: Timing
// ============================================================================

/// Records wall time in `metadata.executionTimeMs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimingMiddleware;

#[async_trait]
impl Middleware for TimingMiddleware {
    fn name(&self) -> &'static str {
        "timing"
    }

    async fn handle(&self, call: CommandCall, next: Next<'_>) -> CommandResult {
        let started = Instant::now();
        let mut result = next.run(call).await;
        result.metadata_mut().execution_time_ms = Some(duration_millis(started.elapsed()));
        result
    }
}

// ============================================================================
// SECTION: Tracing
// ============================================================================

/// Stamps `metadata.traceId` and the command version onto results.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceMiddleware;

#[async_trait]
impl Middleware for TraceMiddleware {
    fn name(&self) -> &'static str {
        "trace"
    }

    async fn handle(&self, call: CommandCall, next: Next<'_>) -> CommandResult {
        let trace_id = call.context.trace_id.clone();
        let version =
            next.registry.get(&call.name).and_then(|def| def.version()).map(str::to_string);
        let mut result = next.run(call).await;
        let metadata = result.metadata_mut();
        if metadata.trace_id.is_none() {
            metadata.trace_id = Some(trace_id);
        }
        if metadata.command_version.is_none() {
            metadata.command_version = version;
        }
        result
    }
}

// ============================================================================
// SECTION: Rate Limiting
// ============================================================================

/// Caller key used when the transport supplies no identity.
const ANONYMOUS_CALLER: &str = "anonymous";

/// Fixed-window counter for one caller.
#[derive(Debug, Clone, Copy)]
struct FixedWindow {
    /// Window start.
    started: Instant,
    /// Requests admitted in this window.
    count: u32,
}

/// Per-caller fixed-window rate limiter.
///
/// # Invariants
/// - At most `max_entries` callers are tracked; the stalest window is
///   evicted first.
#[derive(Debug)]
pub struct RateLimiter {
    /// Requests allowed per window.
    max_requests: u32,
    /// Window length.
    window: Duration,
    /// Tracked caller bound.
    max_entries: usize,
    /// Windows by caller.
    windows: Mutex<HashMap<String, FixedWindow>>,
}

impl RateLimiter {
    /// Creates a limiter.
    #[must_use]
    pub fn new(max_requests: u32, window: Duration, max_entries: usize) -> Self {
        Self {
            max_requests,
            window,
            max_entries: max_entries.max(1),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Admits or rejects one request for `caller`.
    ///
    /// # Errors
    ///
    /// Returns the milliseconds until the caller's window resets.
    pub fn check(&self, caller: &str) -> Result<(), u64> {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        if !windows.contains_key(caller) && windows.len() >= self.max_entries {
            let window = self.window;
            windows.retain(|_, entry| now.duration_since(entry.started) < window);
            if windows.len() >= self.max_entries
                && let Some(stalest) = windows
                    .iter()
                    .min_by_key(|(_, entry)| entry.started)
                    .map(|(key, _)| key.clone())
            {
                windows.remove(&stalest);
            }
        }
        let entry = windows.entry(caller.to_string()).or_insert(FixedWindow {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }
        if entry.count >= self.max_requests {
            let reset = self.window.saturating_sub(now.duration_since(entry.started));
            return Err(duration_millis(reset));
        }
        entry.count += 1;
        Ok(())
    }
}

/// Short-circuits calls over the limit with `RATE_LIMITED`.
#[derive(Debug)]
pub struct RateLimitMiddleware {
    /// Shared limiter.
    limiter: RateLimiter,
}

impl RateLimitMiddleware {
    /// Creates the middleware around a limiter.
    #[must_use]
    pub const fn new(limiter: RateLimiter) -> Self {
        Self {
            limiter,
        }
    }

    /// Checks the caller of a call.
    fn admit(&self, call: &CommandCall) -> Result<(), CommandError> {
        let caller = call.context.caller.as_deref().unwrap_or(ANONYMOUS_CALLER);
        self.limiter.check(caller).map_err(|retry_after_ms| {
            tracing::warn!(caller, command = %call.name, retry_after_ms, "rate limit exceeded");
            CommandError::rate_limited(retry_after_ms)
        })
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn handle(&self, call: CommandCall, next: Next<'_>) -> CommandResult {
        match self.admit(&call) {
            Ok(()) => next.run(call).await,
            Err(error) => CommandResult::failure(error),
        }
    }

    async fn handle_stream(&self, call: CommandCall, next: NextStream<'_>) -> ChunkStream {
        match self.admit(&call) {
            Ok(()) => next.run(call).await,
            Err(error) => ChunkStream::failed(error),
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
