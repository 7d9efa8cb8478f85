// crates/conduit-core/src/dispatcher.rs
// ============================================================================
// Module: Dispatcher
// Description: Single entry point shared by every transport.
// Purpose: Compose middleware around the registry and enforce call deadlines.
// Dependencies: serde_json, tokio, crate::{middleware, registry}
// ============================================================================

//! ## Overview
//! Transports never touch the registry directly; they hand a name, raw
//! input, and a [`CommandContext`] to the [`Dispatcher`]. The same input
//! therefore produces the same result data whichever transport carried it.
//!
//! When the context has a deadline, [`Dispatcher::call`] stops waiting once
//! it passes, cancels the context token, and returns `TIMEOUT`. The handler
//! is not aborted; it observes the token cooperatively.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;
use tokio::time::Instant;

use crate::command::CommandDescriptor;
use crate::context::CommandContext;
use crate::context::duration_millis;
use crate::error::CommandError;
use crate::middleware::CommandCall;
use crate::middleware::Middleware;
use crate::middleware::Next;
use crate::middleware::NextStream;
use crate::registry::CommandRegistry;
use crate::result::CommandResult;
use crate::streaming::ChunkStream;

// ============================================================================
// SECTION: Dispatcher
// ============================================================================

/// Registry plus the ordered middleware chain.
///
/// # Invariants
/// - Middleware runs in declaration order; the first is outermost.
#[derive(Clone)]
pub struct Dispatcher {
    /// Frozen registry.
    registry: Arc<CommandRegistry>,
    /// Middleware chain.
    middleware: Vec<Arc<dyn Middleware>>,
}

impl Dispatcher {
    /// Creates a dispatcher with no middleware.
    #[must_use]
    pub const fn new(registry: Arc<CommandRegistry>) -> Self {
        Self {
            registry,
            middleware: Vec::new(),
        }
    }

    /// Appends a middleware to the chain.
    #[must_use]
    pub fn with_middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Returns the registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Returns the names of the configured middleware, outermost first.
    #[must_use]
    pub fn middleware_names(&self) -> Vec<&'static str> {
        self.middleware.iter().map(|middleware| middleware.name()).collect()
    }

    /// Returns discovery descriptors in registration order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<CommandDescriptor> {
        self.registry.descriptors()
    }

    /// Dispatches a call and returns its single result.
    pub async fn call(&self, name: &str, input: Value, context: CommandContext) -> CommandResult {
        let deadline = context.deadline;
        let cancellation = context.cancellation.clone();
        let started = Instant::now();
        let call = CommandCall {
            name: name.to_string(),
            input,
            context,
        };
        let run = Next::new(&self.middleware, &self.registry).run(call);
        let Some(deadline) = deadline else {
            return run.await;
        };
        match tokio::time::timeout_at(deadline, run).await {
            Ok(result) => result,
            Err(_) => {
                cancellation.cancel();
                let waited_ms = duration_millis(deadline.saturating_duration_since(started));
                tracing::warn!(command = name, waited_ms, "command deadline exceeded");
                CommandResult::failure(CommandError::timeout(name, waited_ms))
            }
        }
    }

    /// Dispatches a call as a chunk stream.
    ///
    /// The stream enforces the context deadline between chunks.
    pub async fn stream(&self, name: &str, input: Value, context: CommandContext) -> ChunkStream {
        let call = CommandCall {
            name: name.to_string(),
            input,
            context,
        };
        NextStream::new(&self.middleware, &self.registry).run(call).await
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("commands", &self.registry.len())
            .field("middleware", &self.middleware_names())
            .finish()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use std::time::Duration;

    use serde_json::json;

    use super::Dispatcher;
    use crate::command::CommandDefinition;
    use crate::command::CommandOutput;
    use crate::command::handler_fn;
    use crate::context::CommandContext;
    use crate::context::TransportKind;
    use crate::error::error_codes;
    use crate::middleware::TimingMiddleware;
    use crate::registry::CommandRegistry;
    use crate::result::CommandResult;
    use crate::schema::InputSchema;

    fn dispatcher() -> Dispatcher {
        let mut registry = CommandRegistry::new();
        registry
            .register(CommandDefinition::new(
                "slow.sleep",
                "Sleeps until cancelled",
                InputSchema::any_object().unwrap(),
                handler_fn(|_input, ctx| async move {
                    ctx.cancellation.cancelled().await;
                    Ok(CommandOutput::from(CommandResult::success(json!("stopped"))))
                }),
            ))
            .unwrap();
        Dispatcher::new(registry.into_shared().unwrap()).with_middleware(TimingMiddleware)
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_returns_timeout_and_cancels() {
        let dispatcher = dispatcher();
        let context = CommandContext::new("trace-deadline", TransportKind::InProcess)
            .with_timeout(Duration::from_millis(250));
        let token = context.cancellation.clone();
        let result = dispatcher.call("slow.sleep", json!({}), context).await;
        let error = result.error().unwrap();
        assert_eq!(error.code, error_codes::TIMEOUT);
        assert_eq!(error.retryable, Some(true));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn bootstrap_commands_are_dispatchable() {
        let dispatcher = dispatcher();
        let context = CommandContext::new("trace-help", TransportKind::InProcess);
        let result = dispatcher.call("meta.help", json!({}), context).await;
        assert!(result.is_success());
        assert_eq!(dispatcher.middleware_names(), ["timing"]);
        assert!(dispatcher.descriptors().iter().any(|descriptor| descriptor.name == "meta.docs"));
    }
}
