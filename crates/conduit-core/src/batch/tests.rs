// crates/conduit-core/src/batch/tests.rs
// ============================================================================
// Module: Batch Executor Tests
// Description: Ordering, skip semantics, concurrency bound, aggregation.
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions are permitted."
)]

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;

use super::BatchError;
use super::BatchExecutor;
use super::BatchItem;
use super::BatchOptions;
use super::BatchRequest;
use crate::command::CommandDefinition;
use crate::command::CommandOutput;
use crate::command::handler_fn;
use crate::context::CommandContext;
use crate::context::TransportKind;
use crate::dispatcher::Dispatcher;
use crate::error::CommandError;
use crate::error::error_codes;
use crate::registry::CommandRegistry;
use crate::result::CommandResult;
use crate::schema::InputSchema;

/// Counters observed by the `step` command.
#[derive(Default)]
struct Counters {
    /// Items currently running.
    active: AtomicUsize,
    /// Highest observed `active`.
    peak: AtomicUsize,
    /// Items that ran to completion.
    finished: AtomicUsize,
}

/// Registers `step{ok, delayMs, confidence?}`.
fn executor(counters: &Arc<Counters>) -> BatchExecutor {
    let counters = Arc::clone(counters);
    let mut registry = CommandRegistry::new();
    registry
        .register(CommandDefinition::new(
            "step",
            "Sleeps then succeeds or fails",
            InputSchema::object(
                json!({
                    "ok": { "type": "boolean" },
                    "delayMs": { "type": "integer", "minimum": 0 },
                    "confidence": { "type": "number" }
                }),
                &["ok", "delayMs"],
            )
            .unwrap(),
            handler_fn(move |input, _ctx| {
                let counters = Arc::clone(&counters);
                async move {
                    let now = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
                    counters.peak.fetch_max(now, Ordering::SeqCst);
                    let delay = input["delayMs"].as_u64().unwrap_or(0);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    counters.active.fetch_sub(1, Ordering::SeqCst);
                    counters.finished.fetch_add(1, Ordering::SeqCst);
                    let result = if input["ok"].as_bool().unwrap_or(false) {
                        let mut result = CommandResult::success(input.clone());
                        if let Some(confidence) = input["confidence"].as_f64() {
                            result = result.with_confidence(confidence);
                        }
                        result
                    } else {
                        CommandResult::failure(CommandError::validation("step told to fail"))
                    };
                    Ok(CommandOutput::from(result))
                }
            }),
        ))
        .unwrap();
    BatchExecutor::new(Dispatcher::new(registry.into_shared().unwrap()))
}

fn step(id: &str, ok: bool, delay_ms: u64) -> BatchItem {
    BatchItem {
        id: Some(id.to_string()),
        command: "step".to_string(),
        input: json!({ "ok": ok, "delayMs": delay_ms }),
    }
}

fn ctx() -> CommandContext {
    CommandContext::new("trace-batch", TransportKind::InProcess)
}

#[tokio::test(start_paused = true)]
async fn middle_failure_skips_the_rest() {
    let counters = Arc::new(Counters::default());
    let request = BatchRequest {
        commands: vec![step("a", true, 10), step("b", false, 10), step("c", true, 10)],
        options: Some(BatchOptions {
            continue_on_error: false,
            max_concurrent: 1,
            timeout_ms: None,
        }),
    };
    let response = executor(&counters).execute(request, ctx()).await.unwrap();
    assert_eq!(response.summary.total, 3);
    assert_eq!(response.summary.succeeded, 1);
    assert_eq!(response.summary.failed, 1);
    assert_eq!(response.summary.skipped, 1);
    let skipped = response.results[2].result.error().unwrap();
    assert_eq!(skipped.code, error_codes::COMMAND_SKIPPED);
    assert_eq!(skipped.details, Some(json!({ "started": false })));
    assert_eq!(counters.finished.load(Ordering::SeqCst), 2);
    assert!((response.confidence - 1.0).abs() < f64::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn started_items_after_a_failure_complete_but_report_skipped() {
    let counters = Arc::new(Counters::default());
    let request = BatchRequest {
        commands: vec![step("a", true, 50), step("b", false, 10), step("c", true, 100)],
        options: Some(BatchOptions {
            continue_on_error: false,
            max_concurrent: 4,
            timeout_ms: None,
        }),
    };
    let response = executor(&counters).execute(request, ctx()).await.unwrap();
    assert_eq!(counters.finished.load(Ordering::SeqCst), 3);
    assert!(response.results[0].result.is_success());
    assert_eq!(response.results[1].result.error().unwrap().code, error_codes::VALIDATION_ERROR);
    let skipped = response.results[2].result.error().unwrap();
    assert_eq!(skipped.code, error_codes::COMMAND_SKIPPED);
    assert_eq!(skipped.details, Some(json!({ "started": true })));
    assert_eq!(response.summary.skipped, 1);
}

#[tokio::test(start_paused = true)]
async fn continue_on_error_preserves_input_order() {
    let counters = Arc::new(Counters::default());
    let commands: Vec<BatchItem> = (0 .. 6_u64)
        .map(|index| step(&format!("item-{index}"), index % 2 == 0, 60 - index * 10))
        .collect();
    let request = BatchRequest {
        commands,
        options: Some(BatchOptions {
            continue_on_error: true,
            max_concurrent: 3,
            timeout_ms: None,
        }),
    };
    let response = executor(&counters).execute(request, ctx()).await.unwrap();
    assert_eq!(response.results.len(), 6);
    for (index, item) in response.results.iter().enumerate() {
        assert_eq!(item.id.as_deref(), Some(format!("item-{index}").as_str()));
        assert_eq!(item.result.is_success(), index % 2 == 0);
        assert!(item.duration_ms.is_some());
    }
    assert_eq!(response.summary.succeeded, 3);
    assert_eq!(response.summary.failed, 3);
    assert_eq!(response.summary.skipped, 0);
}

#[tokio::test(start_paused = true)]
async fn concurrency_never_exceeds_the_window() {
    let counters = Arc::new(Counters::default());
    let commands: Vec<BatchItem> =
        (0 .. 12_u64).map(|index| step(&index.to_string(), true, 5 + (index % 4) * 7)).collect();
    let request = BatchRequest {
        commands,
        options: Some(BatchOptions {
            continue_on_error: true,
            max_concurrent: 3,
            timeout_ms: None,
        }),
    };
    let response = executor(&counters).execute(request, ctx()).await.unwrap();
    assert_eq!(response.summary.succeeded, 12);
    assert!(counters.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(counters.finished.load(Ordering::SeqCst), 12);
}

#[tokio::test]
async fn confidence_is_the_mean_of_successes() {
    let counters = Arc::new(Counters::default());
    let request = BatchRequest {
        commands: vec![
            BatchItem::new("step", json!({ "ok": true, "delayMs": 0, "confidence": 0.5 })),
            BatchItem::new("step", json!({ "ok": true, "delayMs": 0 })),
            BatchItem::new("step", json!({ "ok": false, "delayMs": 0 })),
        ],
        options: Some(BatchOptions {
            continue_on_error: true,
            ..BatchOptions::default()
        }),
    };
    let response = executor(&counters).execute(request, ctx()).await.unwrap();
    assert!((response.confidence - 0.75).abs() < 1e-9);

    let all_failed = BatchRequest {
        commands: vec![BatchItem::new("missing.command", json!({}))],
        options: None,
    };
    let response = executor(&counters).execute(all_failed, ctx()).await.unwrap();
    assert!(response.confidence.abs() < f64::EPSILON);
    assert_eq!(response.summary.failed, 1);
}

#[tokio::test]
async fn malformed_batches_are_rejected_before_running() {
    let counters = Arc::new(Counters::default());
    let executor = executor(&counters).with_max_commands(2);
    let empty = BatchRequest {
        commands: Vec::new(),
        options: None,
    };
    assert_eq!(executor.execute(empty, ctx()).await.unwrap_err(), BatchError::Empty);
    let large = BatchRequest {
        commands: vec![step("a", true, 0), step("b", true, 0), step("c", true, 0)],
        options: None,
    };
    let err = executor.execute(large, ctx()).await.unwrap_err();
    assert_eq!(
        err,
        BatchError::TooLarge {
            actual: 3,
            limit: 2
        }
    );
    assert_eq!(err.to_command_error().code, error_codes::INVALID_BATCH_REQUEST);
    let zero = BatchRequest {
        commands: vec![step("a", true, 0)],
        options: Some(BatchOptions {
            max_concurrent: 0,
            ..BatchOptions::default()
        }),
    };
    assert_eq!(executor.execute(zero, ctx()).await.unwrap_err(), BatchError::InvalidConcurrency);
    assert_eq!(counters.finished.load(Ordering::SeqCst), 0);
}

#[test]
fn item_results_flatten_the_command_result() {
    let request: BatchRequest = serde_json::from_value(json!({
        "commands": [{ "command": "echo", "input": { "msg": "hi" } }],
        "options": { "continueOnError": true }
    }))
    .unwrap();
    let options = request.options.unwrap();
    assert!(options.continue_on_error);
    assert_eq!(options.max_concurrent, 4);
    let item = super::BatchItemResult {
        id: Some("1".to_string()),
        command: "echo".to_string(),
        result: CommandResult::success(json!({ "msg": "hi" })),
        duration_ms: Some(3),
    };
    let encoded = serde_json::to_value(&item).unwrap();
    assert_eq!(
        encoded,
        json!({
            "id": "1",
            "command": "echo",
            "success": true,
            "data": { "msg": "hi" },
            "durationMs": 3
        })
    );
    let decoded: super::BatchItemResult = serde_json::from_value(encoded).unwrap();
    assert_eq!(decoded, item);
}
