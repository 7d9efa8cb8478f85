// crates/conduit-core/tests/common/mod.rs
// ============================================================================
// Module: Common Test Fixtures
// Description: Shared registries and contexts for core integration tests.
// Purpose: Build small, deterministic command sets for end-to-end checks.
// Dependencies: conduit-core
// ============================================================================

//! ## Overview
//! Fixture commands:
//! - `echo{msg}` returns its input.
//! - `fail{code?}` returns a failed result with the given code.
//! - `count.up{to}` streams `to` data chunks, checking cancellation between
//!   chunks and reporting the next index as its resume cursor.

#![allow(dead_code, reason = "Shared test helpers may be unused in some cases.")]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use conduit_core::CommandContext;
use conduit_core::CommandDefinition;
use conduit_core::CommandError;
use conduit_core::CommandOutput;
use conduit_core::CommandRegistry;
use conduit_core::CommandResult;
use conduit_core::ChunkStream;
use conduit_core::Dispatcher;
use conduit_core::InputSchema;
use conduit_core::LoggingMiddleware;
use conduit_core::StreamFailure;
use conduit_core::TimingMiddleware;
use conduit_core::TraceMiddleware;
use conduit_core::TransportKind;
use conduit_core::handler_fn;
use serde_json::json;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Returns an in-process context with a fixed trace id.
pub fn sample_context(trace_id: &str) -> CommandContext {
    CommandContext::new(trace_id, TransportKind::InProcess)
}

/// Builds the frozen fixture registry.
pub fn sample_registry() -> Arc<CommandRegistry> {
    let mut registry = CommandRegistry::new();
    registry
        .register(
            CommandDefinition::new(
                "echo",
                "Returns the message",
                InputSchema::object(json!({ "msg": { "type": "string" } }), &["msg"]).unwrap(),
                handler_fn(|input, _ctx| async move {
                    Ok(CommandOutput::from(CommandResult::success(input)))
                }),
            )
            .with_category("demo"),
        )
        .unwrap();
    registry
        .register(CommandDefinition::new(
            "fail",
            "Always fails",
            InputSchema::object(json!({ "code": { "type": "string" } }), &[]).unwrap(),
            handler_fn(|input, _ctx| async move {
                let code = input["code"].as_str().unwrap_or("NOT_FOUND").to_string();
                Ok(CommandOutput::from(CommandResult::failure(CommandError::new(
                    code,
                    "fixture failure",
                ))))
            }),
        ))
        .unwrap();
    registry
        .register(
            CommandDefinition::new(
                "count.up",
                "Streams a count",
                InputSchema::object(
                    json!({ "to": { "type": "integer", "minimum": 0, "maximum": 1000 } }),
                    &["to"],
                )
                .unwrap(),
                handler_fn(|input, ctx| async move {
                    let to = input["to"].as_u64().unwrap_or(0);
                    Ok(CommandOutput::from(ChunkStream::spawn(&ctx, move |emitter| async move {
                        for index in 0 .. to {
                            emitter.checkpoint(Some(json!(index)))?;
                            emitter.data(json!(index), index + 1 == to).await?;
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                        Ok::<_, StreamFailure>(CommandResult::success(json!({ "count": to })))
                    })))
                }),
            )
            .as_streaming(),
        )
        .unwrap();
    registry.into_shared().unwrap()
}

/// Builds a dispatcher over the fixture registry with the standard chain.
pub fn sample_dispatcher() -> Dispatcher {
    Dispatcher::new(sample_registry())
        .with_middleware(LoggingMiddleware)
        .with_middleware(TimingMiddleware)
        .with_middleware(TraceMiddleware)
}
