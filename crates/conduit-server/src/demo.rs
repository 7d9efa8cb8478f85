// crates/conduit-server/src/demo.rs
// ============================================================================
// Module: Demo Commands
// Description: Small command set served by `conduit serve`.
// Purpose: Exercise calls, streaming, cancellation, and retry end to end.
// Dependencies: conduit-core, serde_json, tokio
// ============================================================================

//! ## Overview
//! - `echo{msg}` returns its input unchanged.
//! - `math.add{a, b}` returns `{sum}`.
//! - `demo.count{to, delayMs?}` streams one data chunk per step with progress.
//! - `demo.sleep{ms}` waits, returning early with `COMMAND_CANCELLED` when the
//!   caller cancels.
//! - `demo.flaky{failures}` calls a simulated upstream that fails with
//!   `NETWORK_ERROR` the given number of times, wrapped in the retry helper.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use conduit_core::ChunkStream;
use conduit_core::CommandDefinition;
use conduit_core::CommandError;
use conduit_core::CommandOutput;
use conduit_core::CommandResult;
use conduit_core::InputSchema;
use conduit_core::RetryPolicy;
use conduit_core::SchemaError;
use conduit_core::StreamFailure;
use conduit_core::TokioSleeper;
use conduit_core::handler_fn;
use conduit_core::retry;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Category of every demo command.
const DEMO_CATEGORY: &str = "demo";
/// Largest count `demo.count` accepts.
const MAX_COUNT: u64 = 1_000;
/// Longest per-step delay `demo.count` accepts.
const MAX_STEP_DELAY_MS: u64 = 10_000;
/// Longest wait `demo.sleep` accepts.
const MAX_SLEEP_MS: u64 = 60_000;
/// Most simulated failures `demo.flaky` accepts.
const MAX_FLAKY_FAILURES: u64 = 10;

// ============================================================================
// SECTION: Definitions
// ============================================================================

/// Builds the demo command set.
///
/// # Errors
///
/// Returns [`SchemaError`] when an input schema fails to compile.
pub fn demo_commands(retry_policy: RetryPolicy) -> Result<Vec<CommandDefinition>, SchemaError> {
    Ok(vec![echo()?, math_add()?, count()?, sleep()?, flaky(retry_policy)?])
}

/// `echo{msg}`.
fn echo() -> Result<CommandDefinition, SchemaError> {
    let schema = InputSchema::object(json!({ "msg": { "type": "string" } }), &["msg"])?;
    Ok(CommandDefinition::new(
        "echo",
        "Returns the input unchanged",
        schema,
        handler_fn(|input, _ctx| async move {
            Ok(CommandOutput::from(CommandResult::success(input)))
        }),
    )
    .with_category(DEMO_CATEGORY)
    .with_version("1.0.0"))
}

/// `math.add{a, b}`.
fn math_add() -> Result<CommandDefinition, SchemaError> {
    let schema = InputSchema::object(
        json!({ "a": { "type": "number" }, "b": { "type": "number" } }),
        &["a", "b"],
    )?;
    Ok(CommandDefinition::new(
        "math.add",
        "Adds two numbers",
        schema,
        handler_fn(|input, _ctx| async move {
            let sum = number(&input, "a") + number(&input, "b");
            Ok(CommandOutput::from(
                CommandResult::success(json!({ "sum": sum })).with_confidence(1.0),
            ))
        }),
    )
    .with_category(DEMO_CATEGORY)
    .with_tags(["math"])
    .with_version("1.0.0"))
}

/// `demo.count{to, delayMs?}`.
fn count() -> Result<CommandDefinition, SchemaError> {
    let schema = InputSchema::object(
        json!({
            "to": { "type": "integer", "minimum": 0, "maximum": MAX_COUNT },
            "delayMs": { "type": "integer", "minimum": 0, "maximum": MAX_STEP_DELAY_MS },
        }),
        &["to"],
    )?;
    Ok(CommandDefinition::new(
        "demo.count",
        "Streams the numbers below `to`, one chunk per step",
        schema,
        handler_fn(|input, ctx| async move {
            let to = input["to"].as_u64().unwrap_or(0);
            let delay = Duration::from_millis(input["delayMs"].as_u64().unwrap_or(0));
            Ok(CommandOutput::from(ChunkStream::spawn(&ctx, move |emitter| async move {
                for index in 0 .. to {
                    emitter.checkpoint(Some(json!(index)))?;
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    emitter.data(json!(index), index + 1 == to).await?;
                    emitter.checkpoint(Some(json!(index + 1)))?;
                    emitter.progress_items(index + 1, to, format!("counted {}", index + 1)).await?;
                }
                Ok::<_, StreamFailure>(CommandResult::success(json!({ "count": to })))
            })))
        }),
    )
    .as_streaming()
    .with_category(DEMO_CATEGORY))
}

/// `demo.sleep{ms}`.
fn sleep() -> Result<CommandDefinition, SchemaError> {
    let schema = InputSchema::object(
        json!({ "ms": { "type": "integer", "minimum": 0, "maximum": MAX_SLEEP_MS } }),
        &["ms"],
    )?;
    Ok(CommandDefinition::new(
        "demo.sleep",
        "Waits for `ms` milliseconds unless cancelled",
        schema,
        handler_fn(|input, ctx| async move {
            let ms = input["ms"].as_u64().unwrap_or(0);
            let result = tokio::select! {
                () = tokio::time::sleep(Duration::from_millis(ms)) => {
                    CommandResult::success(json!({ "sleptMs": ms }))
                }
                () = ctx.cancellation.cancelled() => {
                    CommandResult::failure(CommandError::cancelled("sleep cancelled by caller"))
                }
            };
            Ok(CommandOutput::from(result))
        }),
    )
    .with_category(DEMO_CATEGORY))
}

/// `demo.flaky{failures}`.
fn flaky(policy: RetryPolicy) -> Result<CommandDefinition, SchemaError> {
    let schema = InputSchema::object(
        json!({ "failures": { "type": "integer", "minimum": 0, "maximum": MAX_FLAKY_FAILURES } }),
        &["failures"],
    )?;
    Ok(CommandDefinition::new(
        "demo.flaky",
        "Calls an upstream that fails `failures` times before answering",
        schema,
        handler_fn(move |input, _ctx| async move {
            let failures = u32::try_from(input["failures"].as_u64().unwrap_or(0)).unwrap_or(0);
            let outcome = retry(policy, &TokioSleeper, "demo.flaky", move |attempt| async move {
                if attempt < failures {
                    Err(CommandError::network(format!("simulated connection reset #{attempt}")))
                } else {
                    Ok(json!({ "attempts": attempt + 1 }))
                }
            })
            .await;
            let result = match outcome {
                Ok(data) => CommandResult::success(data),
                Err(err) => CommandResult::failure(err.into_command_error()),
            };
            Ok(CommandOutput::from(result))
        }),
    )
    .with_category(DEMO_CATEGORY))
}

/// Reads a numeric field, treating absence as zero.
fn number(input: &Value, field: &str) -> f64 {
    input[field].as_f64().unwrap_or(0.0)
}
