// crates/conduit-core/src/pipeline.rs
// ============================================================================
// Module: Pipeline Executor
// Description: Sequential command chains with data flow between steps.
// Purpose: Run dependent commands in one request and aggregate their trust
//          metadata.
// Dependencies: serde, serde_json, thiserror, tokio, crate::dispatcher
// ============================================================================

//! ## Overview
//! A pipeline is an ordered list of steps run one after another through
//! [`Dispatcher::call`]. Before a step runs, every string in its input that
//! is a variable reference is replaced with a value from earlier steps:
//!
//! - `$prev` / `$prev.path`: data of the most recent successful step.
//! - `$first` / `$first.path`: data of step 0.
//! - `$input` / `$input.path`: the pipeline-level input.
//! - `$steps[n]` / `$steps[n].path`: data of step `n`.
//! - `$steps.alias` / `$steps.alias.path`: data of the step named `alias`.
//!
//! Paths are dot separated and may index arrays with `name[i]`. A reference
//! that resolves to nothing becomes `null`. Strings starting with `$` whose
//! root is not one of the above stay literal.
//!
//! A step with a `when` condition that evaluates false is reported
//! `skipped` and leaves `$prev` unchanged. Without `continueOnFailure`, the
//! first failed step halts the pipeline and every later step is reported
//! `skipped` with `COMMAND_SKIPPED`.
//!
//! The pipeline confidence is the minimum confidence of the successful
//! steps, or 0 when none succeeded; the final data is the data of the last
//! successful step.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tokio::time::Instant;

use crate::context::CommandContext;
use crate::context::duration_millis;
use crate::dispatcher::Dispatcher;
use crate::error::CommandError;
use crate::error::error_codes;
use crate::metadata::Alternative;
use crate::metadata::Source;
use crate::metadata::Warning;
use crate::result::CommandResult;
use crate::result::Outcome;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default maximum number of steps per pipeline.
pub const DEFAULT_MAX_STEPS: usize = 50;

// ============================================================================
// SECTION: Request Types
// ============================================================================

/// Predicate deciding whether a step runs.
///
/// Wire form is a single `$`-prefixed key, e.g.
/// `{"$gt": ["$prev.count", 3]}` or `{"$not": {"$exists": "$steps.a"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineCondition {
    /// The reference resolves to a non-null value.
    #[serde(rename = "$exists")]
    Exists(String),
    /// The reference equals the value.
    #[serde(rename = "$eq")]
    Eq(String, Value),
    /// The reference differs from the value.
    #[serde(rename = "$ne")]
    Ne(String, Value),
    /// The reference is a number greater than the bound.
    #[serde(rename = "$gt")]
    Gt(String, f64),
    /// The reference is a number at least the bound.
    #[serde(rename = "$gte")]
    Gte(String, f64),
    /// The reference is a number less than the bound.
    #[serde(rename = "$lt")]
    Lt(String, f64),
    /// The reference is a number at most the bound.
    #[serde(rename = "$lte")]
    Lte(String, f64),
    /// Every condition holds; true when empty.
    #[serde(rename = "$and")]
    And(Vec<PipelineCondition>),
    /// Some condition holds; false when empty.
    #[serde(rename = "$or")]
    Or(Vec<PipelineCondition>),
    /// The condition does not hold.
    #[serde(rename = "$not")]
    Not(Box<PipelineCondition>),
}

/// One step of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Command name.
    pub command: String,
    /// Input template; absent input is treated as `{}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Name for `$steps.alias` references.
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Run the step only when this holds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<PipelineCondition>,
}

impl PipelineStep {
    /// Creates a step with an input template.
    #[must_use]
    pub fn new(command: impl Into<String>, input: Value) -> Self {
        Self {
            command: command.into(),
            input: Some(input),
            alias: None,
            when: None,
        }
    }

    /// Names the step.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Guards the step with a condition.
    #[must_use]
    pub fn with_when(mut self, when: PipelineCondition) -> Self {
        self.when = Some(when);
        self
    }
}

/// Execution policy for a pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOptions {
    /// Keep running steps after a failure.
    #[serde(default)]
    pub continue_on_failure: bool,
    /// Deadline for the whole pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Pipeline request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRequest {
    /// Caller-chosen correlation id echoed in the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Value behind `$input` references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Steps in execution order.
    pub steps: Vec<PipelineStep>,
    /// Policy; defaults apply when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<PipelineOptions>,
}

// ============================================================================
// SECTION: Result Types
// ============================================================================

/// Outcome class of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// The command succeeded.
    Success,
    /// The command failed.
    Failure,
    /// The step did not run.
    Skipped,
}

/// Result of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    /// Position in the pipeline.
    pub index: usize,
    /// Step alias.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Command name.
    pub command: String,
    /// Outcome class.
    pub status: StepStatus,
    /// Data of a successful step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error of a failed or halted step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
    /// Wall time spent on the step; 0 for skipped steps.
    pub execution_time_ms: u64,
    /// Confidence reported by the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Reasoning reported by the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Sources reported by the command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
    /// Warnings reported by the command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
    /// Alternatives reported by the command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<Alternative>,
}

impl StepResult {
    /// Builds the entry of a step that did not run.
    fn skipped(index: usize, step: PipelineStep, error: Option<CommandError>) -> Self {
        Self {
            index,
            alias: step.alias,
            command: step.command,
            status: StepStatus::Skipped,
            data: None,
            error,
            execution_time_ms: 0,
            confidence: None,
            reasoning: None,
            sources: Vec::new(),
            warnings: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Builds the entry of a step that ran.
    fn ran(
        index: usize,
        step: PipelineStep,
        mut result: CommandResult,
        execution_time_ms: u64,
    ) -> Self {
        let confidence = result.confidence.take();
        let reasoning = result.reasoning.take();
        let sources = result.sources.take().unwrap_or_default();
        let warnings = result.warnings.take().unwrap_or_default();
        let alternatives = result.alternatives.take().unwrap_or_default();
        let (status, data, error) = match result.into_outcome() {
            Outcome::Success(data) => (StepStatus::Success, Some(data), None),
            Outcome::Failure(error) => (StepStatus::Failure, None, Some(error)),
        };
        Self {
            index,
            alias: step.alias,
            command: step.command,
            status,
            data,
            error,
            execution_time_ms,
            confidence,
            reasoning,
            sources,
            warnings,
            alternatives,
        }
    }
}

/// Confidence contributed by one successful step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfidence {
    /// Step index.
    pub step: usize,
    /// Step alias.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Command name.
    pub command: String,
    /// Reported confidence, 1.0 when the command gave none.
    pub confidence: f64,
    /// Reasoning reported alongside.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Reasoning attributed to a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReasoning {
    /// Step index.
    pub step_index: usize,
    /// Command name.
    pub command: String,
    /// Reasoning text.
    pub reasoning: String,
}

/// Warning attributed to a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineWarning {
    /// The command's warning.
    #[serde(flatten)]
    pub warning: Warning,
    /// Step index.
    pub step_index: usize,
    /// Step alias.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_alias: Option<String>,
}

/// Source attributed to a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSource {
    /// The command's source.
    #[serde(flatten)]
    pub source: Source,
    /// Step index.
    pub step_index: usize,
}

/// Alternative attributed to a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineAlternative {
    /// The command's alternative.
    #[serde(flatten)]
    pub alternative: Alternative,
    /// Step index.
    pub step_index: usize,
}

/// Aggregated trust metadata of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineMetadata {
    /// Minimum confidence over successful steps, 0 when none succeeded.
    pub confidence: f64,
    /// Per-step confidence of successful steps.
    pub confidence_breakdown: Vec<StepConfidence>,
    /// Reasoning from every step that gave some.
    pub reasoning: Vec<StepReasoning>,
    /// Warnings from every step.
    pub warnings: Vec<PipelineWarning>,
    /// Sources from every step.
    pub sources: Vec<PipelineSource>,
    /// Alternatives from every step.
    pub alternatives: Vec<PipelineAlternative>,
    /// Wall time of the whole pipeline.
    pub execution_time_ms: u64,
    /// Steps that succeeded.
    pub completed_steps: usize,
    /// Steps in the request.
    pub total_steps: usize,
}

/// Pipeline response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Echoed request id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Data of the last successful step, `null` when none succeeded.
    pub data: Value,
    /// Aggregated metadata.
    pub metadata: PipelineMetadata,
    /// Per-step results in request order.
    pub steps: Vec<StepResult>,
}

impl PipelineResult {
    /// Returns true when no step failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.steps.iter().all(|step| step.status != StepStatus::Failure)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Pipeline request rejections raised before any step runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// The request has no steps.
    #[error("pipeline contains no steps")]
    Empty,
    /// The request exceeds the step limit.
    #[error("pipeline has {actual} steps, limit is {limit}")]
    TooLarge {
        /// Steps submitted.
        actual: usize,
        /// Configured limit.
        limit: usize,
    },
    /// Two steps share an alias.
    #[error("step alias `{0}` is used more than once")]
    DuplicateAlias(String),
    /// An alias is empty or contains a path separator.
    #[error("step alias `{0}` must be non-empty and free of `.`, `[` and `]`")]
    InvalidAlias(String),
}

impl PipelineError {
    /// Returns the stable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        error_codes::INVALID_PIPELINE_REQUEST
    }

    /// Converts the rejection into a caller-facing command error.
    #[must_use]
    pub fn to_command_error(&self) -> CommandError {
        CommandError::new(self.code(), self.to_string()).with_retryable(false)
    }
}

// ============================================================================
// SECTION: Variable Resolution
// ============================================================================

/// Values visible to references while a pipeline runs.
#[derive(Debug, Clone, Default)]
pub struct PipelineScope {
    /// Pipeline-level input.
    pub input: Value,
    /// Data of the most recent successful step.
    pub previous: Option<Value>,
    /// Results of the steps seen so far.
    pub steps: Vec<StepResult>,
}

impl PipelineScope {
    /// Creates a scope over the pipeline input.
    #[must_use]
    pub fn new(input: Value) -> Self {
        Self {
            input,
            previous: None,
            steps: Vec::new(),
        }
    }
}

/// Resolves one `$` reference against the scope.
///
/// Returns `None` when the string is not a reference or nothing is found.
#[must_use]
pub fn resolve_reference(reference: &str, scope: &PipelineScope) -> Option<Value> {
    let body = reference.strip_prefix('$')?;
    let (root, rest) = split_root(body);
    match root {
        "prev" => lookup(scope.previous.as_ref()?, rest),
        "first" => lookup(scope.steps.first()?.data.as_ref()?, rest),
        "input" => lookup(&scope.input, rest),
        "steps" => {
            if let Some(indexed) = rest.strip_prefix('[') {
                let (position, tail) = indexed.split_once(']')?;
                let position: usize = position.parse().ok()?;
                let step = scope.steps.get(position)?;
                lookup(step.data.as_ref()?, tail)
            } else {
                let named = rest.strip_prefix('.')?;
                let (alias, tail) = split_root(named);
                let step =
                    scope.steps.iter().find(|step| step.alias.as_deref() == Some(alias))?;
                lookup(step.data.as_ref()?, tail)
            }
        }
        _ => None,
    }
}

/// Returns true when `value` is a string naming a known reference root.
fn is_reference(value: &str) -> bool {
    value.strip_prefix('$').is_some_and(|body| {
        matches!(split_root(body).0, "prev" | "first" | "input" | "steps")
    })
}

/// Replaces every reference string inside `template` with its value.
///
/// Unresolved references become `null`; other values are copied.
#[must_use]
pub fn resolve_variables(template: &Value, scope: &PipelineScope) -> Value {
    match template {
        Value::String(text) if is_reference(text) => {
            resolve_reference(text, scope).unwrap_or(Value::Null)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| resolve_variables(item, scope)).collect())
        }
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, value)| (key.clone(), resolve_variables(value, scope)))
                .collect::<Map<String, Value>>(),
        ),
        other => other.clone(),
    }
}

/// Splits `name.rest` or `name[rest` at the first separator.
fn split_root(body: &str) -> (&str, &str) {
    let end = body.find(['.', '[']).unwrap_or(body.len());
    body.split_at(end)
}

/// Follows a `.a.b[0]` style tail from `value`; an empty tail is `value`.
fn lookup(value: &Value, tail: &str) -> Option<Value> {
    if tail.is_empty() {
        return Some(value.clone());
    }
    let path = tail.strip_prefix('.').unwrap_or(tail);
    get_nested_value(value, path).cloned()
}

/// Reads a dot-separated path with optional `[i]` array indexes.
///
/// `items[0].name`, `a.b`, and `[1]` are all accepted.
#[must_use]
pub fn get_nested_value<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        let (name, mut indexes) = split_root(segment);
        if !name.is_empty() {
            current = current.as_object()?.get(name)?;
        }
        while let Some(open) = indexes.strip_prefix('[') {
            let (position, tail) = open.split_once(']')?;
            current = current.as_array()?.get(position.parse::<usize>().ok()?)?;
            indexes = tail;
        }
        if !indexes.is_empty() {
            return None;
        }
    }
    Some(current)
}

// ============================================================================
// SECTION: Conditions
// ============================================================================

/// Evaluates a step condition against the scope.
#[must_use]
pub fn evaluate_condition(condition: &PipelineCondition, scope: &PipelineScope) -> bool {
    let number = |reference: &String| resolve_reference(reference, scope)?.as_f64();
    match condition {
        PipelineCondition::Exists(reference) => {
            resolve_reference(reference, scope).is_some_and(|value| !value.is_null())
        }
        PipelineCondition::Eq(reference, expected) => {
            resolve_reference(reference, scope).unwrap_or(Value::Null) == *expected
        }
        PipelineCondition::Ne(reference, expected) => {
            resolve_reference(reference, scope).unwrap_or(Value::Null) != *expected
        }
        PipelineCondition::Gt(reference, bound) => number(reference).is_some_and(|n| n > *bound),
        PipelineCondition::Gte(reference, bound) => {
            number(reference).is_some_and(|n| n >= *bound)
        }
        PipelineCondition::Lt(reference, bound) => number(reference).is_some_and(|n| n < *bound),
        PipelineCondition::Lte(reference, bound) => {
            number(reference).is_some_and(|n| n <= *bound)
        }
        PipelineCondition::And(all) => all.iter().all(|inner| evaluate_condition(inner, scope)),
        PipelineCondition::Or(any) => any.iter().any(|inner| evaluate_condition(inner, scope)),
        PipelineCondition::Not(inner) => !evaluate_condition(inner, scope),
    }
}

// ============================================================================
// SECTION: Executor
// ============================================================================

/// Runs pipelines through a dispatcher.
#[derive(Debug, Clone)]
pub struct PipelineExecutor {
    /// Shared dispatch path.
    dispatcher: Dispatcher,
    /// Maximum steps per pipeline.
    max_steps: usize,
}

impl PipelineExecutor {
    /// Creates an executor with the default step limit.
    #[must_use]
    pub const fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Sets the maximum number of steps per pipeline.
    #[must_use]
    pub const fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Executes a pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] when the request is empty, too large, or
    /// has unusable aliases. Step failures are reported in the result.
    pub async fn execute(
        &self,
        request: PipelineRequest,
        context: CommandContext,
    ) -> Result<PipelineResult, PipelineError> {
        self.validate(&request)?;
        let started = Instant::now();
        let options = request.options.unwrap_or_default();
        let context = match options.timeout_ms {
            Some(timeout_ms) => context.with_deadline_cap(Duration::from_millis(timeout_ms)),
            None => context,
        };
        let total_steps = request.steps.len();
        let mut scope = PipelineScope::new(request.input.unwrap_or(Value::Null));
        let mut halted_at: Option<usize> = None;

        for (index, step) in request.steps.into_iter().enumerate() {
            if let Some(failed_index) = halted_at {
                let error = CommandError::new(
                    error_codes::COMMAND_SKIPPED,
                    format!("Skipped because pipeline step {failed_index} failed"),
                )
                .with_retryable(true)
                .with_details(json!({ "failedStep": failed_index }));
                scope.steps.push(StepResult::skipped(index, step, Some(error)));
                continue;
            }
            if let Some(when) = &step.when
                && !evaluate_condition(when, &scope)
            {
                tracing::debug!(
                    trace_id = %context.trace_id,
                    step = index,
                    command = %step.command,
                    "pipeline step condition false"
                );
                scope.steps.push(StepResult::skipped(index, step, None));
                continue;
            }
            let template = step.input.clone().unwrap_or_else(|| json!({}));
            let input = resolve_variables(&template, &scope);
            let step_started = Instant::now();
            let result = self
                .dispatcher
                .call(&step.command, input, context.child(&index.to_string()))
                .await;
            let elapsed = duration_millis(step_started.elapsed());
            let entry = StepResult::ran(index, step, result, elapsed);
            match entry.status {
                StepStatus::Success => scope.previous.clone_from(&entry.data),
                _ if !options.continue_on_failure => halted_at = Some(index),
                _ => {}
            }
            scope.steps.push(entry);
        }

        let result = aggregate(
            request.id,
            scope.steps,
            total_steps,
            duration_millis(started.elapsed()),
        );
        tracing::info!(
            trace_id = %context.trace_id,
            total = total_steps,
            completed = result.metadata.completed_steps,
            confidence = result.metadata.confidence,
            "pipeline completed"
        );
        Ok(result)
    }

    /// Rejects requests that cannot run.
    fn validate(&self, request: &PipelineRequest) -> Result<(), PipelineError> {
        let total = request.steps.len();
        if total == 0 {
            return Err(PipelineError::Empty);
        }
        if total > self.max_steps {
            return Err(PipelineError::TooLarge {
                actual: total,
                limit: self.max_steps,
            });
        }
        let mut aliases = HashSet::new();
        for alias in request.steps.iter().filter_map(|step| step.alias.as_deref()) {
            if alias.is_empty() || alias.contains(['.', '[', ']']) {
                return Err(PipelineError::InvalidAlias(alias.to_string()));
            }
            if !aliases.insert(alias) {
                return Err(PipelineError::DuplicateAlias(alias.to_string()));
            }
        }
        Ok(())
    }
}

/// Folds step results into the pipeline result.
fn aggregate(
    id: Option<String>,
    steps: Vec<StepResult>,
    total_steps: usize,
    execution_time_ms: u64,
) -> PipelineResult {
    let mut metadata = PipelineMetadata {
        confidence: 0.0,
        confidence_breakdown: Vec::new(),
        reasoning: Vec::new(),
        warnings: Vec::new(),
        sources: Vec::new(),
        alternatives: Vec::new(),
        execution_time_ms,
        completed_steps: 0,
        total_steps,
    };
    let mut data = Value::Null;
    let mut lowest: Option<f64> = None;
    for step in &steps {
        if step.status == StepStatus::Success {
            let confidence = step.confidence.unwrap_or(1.0);
            lowest = Some(lowest.map_or(confidence, |current| current.min(confidence)));
            metadata.completed_steps += 1;
            metadata.confidence_breakdown.push(StepConfidence {
                step: step.index,
                alias: step.alias.clone(),
                command: step.command.clone(),
                confidence,
                reasoning: step.reasoning.clone(),
            });
            if let Some(step_data) = &step.data {
                data = step_data.clone();
            }
        }
        if let Some(reasoning) = &step.reasoning {
            metadata.reasoning.push(StepReasoning {
                step_index: step.index,
                command: step.command.clone(),
                reasoning: reasoning.clone(),
            });
        }
        metadata.warnings.extend(step.warnings.iter().map(|warning| PipelineWarning {
            warning: warning.clone(),
            step_index: step.index,
            step_alias: step.alias.clone(),
        }));
        metadata.sources.extend(step.sources.iter().map(|source| PipelineSource {
            source: source.clone(),
            step_index: step.index,
        }));
        metadata.alternatives.extend(step.alternatives.iter().map(|alternative| {
            PipelineAlternative {
                alternative: alternative.clone(),
                step_index: step.index,
            }
        }));
    }
    metadata.confidence = lowest.unwrap_or(0.0);
    PipelineResult {
        id,
        data,
        metadata,
        steps,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
