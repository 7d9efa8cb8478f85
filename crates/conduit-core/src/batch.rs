// crates/conduit-core/src/batch.rs
// ============================================================================
// Module: Batch Executor
// Description: Bounded-concurrency execution of ordered command lists.
// Purpose: Run many commands in one request with partial-failure semantics.
// Dependencies: serde, serde_json, thiserror, tokio, crate::dispatcher
// ============================================================================

//! ## Overview
//! A batch is an ordered list of `{id?, command, input}` items run through
//! the same [`Dispatcher::call`] path as single calls. Items start in input
//! order inside a window of at most `maxConcurrent` running tasks.
//!
//! With `continueOnError = false`, the first observed failure stops new
//! starts. Every item after the lowest failed index is reported as
//! `COMMAND_SKIPPED`; items that had already started still run to
//! completion and their skip entry records `started: true`. Results always
//! follow input order.
//!
//! Security posture: batch size and concurrency are bounded before any item
//! runs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::context::CommandContext;
use crate::context::duration_millis;
use crate::dispatcher::Dispatcher;
use crate::error::CommandError;
use crate::error::error_codes;
use crate::result::CommandResult;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default number of concurrently running items.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;
/// Default maximum number of items per batch.
pub const DEFAULT_MAX_COMMANDS: usize = 100;

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// One command in a batch request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    /// Caller-chosen correlation id echoed in the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Command name.
    pub command: String,
    /// Raw input; absent input is treated as `{}`.
    #[serde(default)]
    pub input: Value,
}

impl BatchItem {
    /// Creates an item without an id.
    #[must_use]
    pub fn new(command: impl Into<String>, input: Value) -> Self {
        Self {
            id: None,
            command: command.into(),
            input,
        }
    }
}

/// Execution policy for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOptions {
    /// Keep starting items after a failure.
    #[serde(default)]
    pub continue_on_error: bool,
    /// Maximum concurrently running items.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Deadline for the whole batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            timeout_ms: None,
        }
    }
}

/// Serde default for `maxConcurrent`.
const fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

/// Batch request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Items in execution order.
    pub commands: Vec<BatchItem>,
    /// Policy; executor defaults apply when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<BatchOptions>,
}

/// Result of one batch item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    /// Echoed item id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Command name.
    pub command: String,
    /// Command outcome.
    #[serde(flatten)]
    pub result: CommandResult,
    /// Wall time spent on the item, absent for items that never ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Counts across a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Number of items.
    pub total: usize,
    /// Items that succeeded.
    pub succeeded: usize,
    /// Items that failed.
    pub failed: usize,
    /// Items reported as skipped.
    pub skipped: usize,
}

/// Batch response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Results in input order.
    pub results: Vec<BatchItemResult>,
    /// Aggregate counts.
    pub summary: BatchSummary,
    /// Mean confidence of succeeded items, or 0 when none succeeded.
    pub confidence: f64,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Batch request rejections raised before any item runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    /// The request has no items.
    #[error("batch contains no commands")]
    Empty,
    /// The request exceeds the item limit.
    #[error("batch has {actual} commands, limit is {limit}")]
    TooLarge {
        /// Items submitted.
        actual: usize,
        /// Configured limit.
        limit: usize,
    },
    /// `maxConcurrent` was zero.
    #[error("maxConcurrent must be at least 1")]
    InvalidConcurrency,
}

impl BatchError {
    /// Returns the stable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        error_codes::INVALID_BATCH_REQUEST
    }

    /// Converts the rejection into a caller-facing command error.
    #[must_use]
    pub fn to_command_error(&self) -> CommandError {
        CommandError::new(self.code(), self.to_string()).with_retryable(false)
    }
}

// ============================================================================
// SECTION: Executor
// ============================================================================

/// Runs batches through a dispatcher.
#[derive(Debug, Clone)]
pub struct BatchExecutor {
    /// Shared dispatch path.
    dispatcher: Dispatcher,
    /// Policy used when a request carries no options.
    defaults: BatchOptions,
    /// Maximum items per batch.
    max_commands: usize,
}

impl BatchExecutor {
    /// Creates an executor with default policy and limits.
    #[must_use]
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            defaults: BatchOptions::default(),
            max_commands: DEFAULT_MAX_COMMANDS,
        }
    }

    /// Sets the policy used when a request carries no options.
    #[must_use]
    pub const fn with_defaults(mut self, defaults: BatchOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Sets the maximum number of items per batch.
    #[must_use]
    pub const fn with_max_commands(mut self, max_commands: usize) -> Self {
        self.max_commands = max_commands;
        self
    }

    /// Executes a batch.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] when the request is empty, too large, or asks
    /// for zero concurrency. Item failures are reported in the response.
    pub async fn execute(
        &self,
        request: BatchRequest,
        context: CommandContext,
    ) -> Result<BatchResponse, BatchError> {
        let options = request.options.unwrap_or(self.defaults);
        let total = request.commands.len();
        if total == 0 {
            return Err(BatchError::Empty);
        }
        if total > self.max_commands {
            return Err(BatchError::TooLarge {
                actual: total,
                limit: self.max_commands,
            });
        }
        if options.max_concurrent == 0 {
            return Err(BatchError::InvalidConcurrency);
        }
        let context = apply_batch_timeout(context, options.timeout_ms);

        let labels: Vec<(Option<String>, String)> =
            request.commands.iter().map(|item| (item.id.clone(), item.command.clone())).collect();
        let mut outcomes: Vec<Option<(CommandResult, u64)>> = (0 .. total).map(|_| None).collect();
        let mut started = vec![false; total];
        let mut first_failure: Option<usize> = None;
        let mut pending = request.commands.into_iter().enumerate();
        let mut running = JoinSet::new();
        let mut task_index = HashMap::new();

        loop {
            while running.len() < options.max_concurrent
                && (options.continue_on_error || first_failure.is_none())
            {
                let Some((index, item)) = pending.next() else {
                    break;
                };
                started[index] = true;
                let dispatcher = self.dispatcher.clone();
                let item_context = context.child(&index.to_string());
                let handle = running.spawn(async move {
                    let started_at = Instant::now();
                    let result = dispatcher.call(&item.command, item.input, item_context).await;
                    (result, duration_millis(started_at.elapsed()))
                });
                task_index.insert(handle.id(), index);
            }
            let Some(joined) = running.join_next_with_id().await else {
                break;
            };
            let (index, outcome) = match joined {
                Ok((id, outcome)) => (task_index.remove(&id), outcome),
                Err(join_error) => {
                    tracing::error!(error = %join_error, "batch item task failed");
                    let failure = CommandResult::failure(CommandError::internal(
                        "Batch item failed unexpectedly",
                    ));
                    (task_index.remove(&join_error.id()), (failure, 0))
                }
            };
            let Some(index) = index else {
                continue;
            };
            if !outcome.0.is_success() {
                first_failure = Some(first_failure.map_or(index, |current| current.min(index)));
            }
            if let Some(slot) = outcomes.get_mut(index) {
                *slot = Some(outcome);
            }
        }

        let skip_after = if options.continue_on_error { None } else { first_failure };
        let results: Vec<BatchItemResult> = labels
            .into_iter()
            .zip(outcomes)
            .zip(started)
            .enumerate()
            .map(|(index, (((id, command), outcome), was_started))| {
                if let Some(failed_index) = skip_after
                    && index > failed_index
                {
                    return BatchItemResult {
                        id,
                        command,
                        result: CommandResult::failure(
                            CommandError::skipped(failed_index)
                                .with_details(json!({ "started": was_started })),
                        ),
                        duration_ms: None,
                    };
                }
                let (result, duration_ms) = outcome.map_or_else(
                    || {
                        (
                            CommandResult::failure(CommandError::internal(
                                "Batch item was not executed",
                            )),
                            None,
                        )
                    },
                    |(result, duration_ms)| (result, Some(duration_ms)),
                );
                BatchItemResult {
                    id,
                    command,
                    result,
                    duration_ms,
                }
            })
            .collect();

        let response = aggregate(results);
        tracing::info!(
            trace_id = %context.trace_id,
            total = response.summary.total,
            succeeded = response.summary.succeeded,
            failed = response.summary.failed,
            skipped = response.summary.skipped,
            "batch completed"
        );
        Ok(response)
    }
}

/// Tightens the context deadline to the batch timeout when one is given.
fn apply_batch_timeout(context: CommandContext, timeout_ms: Option<u64>) -> CommandContext {
    match timeout_ms {
        Some(timeout_ms) => context.with_deadline_cap(Duration::from_millis(timeout_ms)),
        None => context,
    }
}

/// Builds the summary and aggregate confidence.
fn aggregate(results: Vec<BatchItemResult>) -> BatchResponse {
    let mut summary = BatchSummary {
        total: results.len(),
        succeeded: 0,
        failed: 0,
        skipped: 0,
    };
    let mut confidence_sum = 0.0;
    for item in &results {
        match item.result.error() {
            None => {
                summary.succeeded += 1;
                confidence_sum += item.result.confidence.unwrap_or(1.0);
            }
            Some(error) if error.code == error_codes::COMMAND_SKIPPED => summary.skipped += 1,
            Some(_) => summary.failed += 1,
        }
    }
    let confidence = if summary.succeeded == 0 {
        0.0
    } else {
        confidence_sum / f64::from(u32::try_from(summary.succeeded).unwrap_or(u32::MAX))
    };
    BatchResponse {
        results,
        summary,
        confidence,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
