// crates/conduit-core/src/metadata.rs
// ============================================================================
// Module: Result Metadata
// Description: Trust and UX annotations attached to command results.
// Purpose: Attribution, planning, alternatives, and non-fatal warnings.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Optional annotations a handler can attach to a result regardless of
//! success: where information came from ([`Source`]), the steps taken
//! ([`PlanStep`]), other candidate answers ([`Alternative`]), non-fatal
//! notices ([`Warning`]), and execution facts ([`ResultMetadata`]).

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

// ============================================================================
// SECTION: Sources
// ============================================================================

/// Kind of attribution source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Web resource.
    Url,
    /// Local file.
    File,
    /// Database record.
    Database,
    /// Remote API response.
    Api,
    /// Knowledge base entry.
    Knowledge,
    /// Information supplied by the user.
    User,
    /// Anything else.
    Other,
}

/// Attribution for information used to produce a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Display name.
    pub name: String,
    /// Source kind.
    #[serde(rename = "type")]
    pub source_type: SourceType,
    /// Location when the source is addressable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Access timestamp (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessed_at: Option<String>,
    /// Relevance score between 0 and 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f64>,
    /// Quoted excerpt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl Source {
    /// Creates a source with a name and kind.
    #[must_use]
    pub fn new(name: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            name: name.into(),
            source_type,
            url: None,
            accessed_at: None,
            relevance: None,
            snippet: None,
        }
    }

    /// Sets the source location.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the relevance score, clamped to 0..=1.
    #[must_use]
    pub const fn with_relevance(mut self, relevance: f64) -> Self {
        self.relevance = Some(relevance.clamp(0.0, 1.0));
        self
    }
}

// ============================================================================
// SECTION: Plan
// ============================================================================

/// Execution state of a plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStepStatus {
    /// Not started.
    Pending,
    /// In progress.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Not executed.
    Skipped,
}

/// One step of a multi-step operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    /// Step identifier.
    pub step: String,
    /// What the step does.
    pub description: String,
    /// Current state.
    pub status: PlanStepStatus,
    /// Wall time spent in the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Failure message for failed steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlanStep {
    /// Creates a step with the given status.
    #[must_use]
    pub fn new(
        step: impl Into<String>,
        description: impl Into<String>,
        status: PlanStepStatus,
    ) -> Self {
        Self {
            step: step.into(),
            description: description.into(),
            status,
            duration_ms: None,
            error: None,
        }
    }
}

// ============================================================================
// SECTION: Alternatives
// ============================================================================

/// A candidate result the handler considered but did not choose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alternative {
    /// Candidate payload.
    pub data: Value,
    /// Why it was not chosen.
    pub reason: String,
    /// Confidence in the candidate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

// ============================================================================
// SECTION: Warnings
// ============================================================================

/// Severity of a non-fatal warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningSeverity {
    /// Informational.
    Low,
    /// Worth attention.
    Medium,
    /// Likely to affect correctness.
    High,
}

/// Non-fatal notice attached to a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warning {
    /// Machine-readable warning code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Severity level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<WarningSeverity>,
    /// Extra structured context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl Warning {
    /// Creates a warning with a code and message.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity: None,
            context: None,
        }
    }

    /// Sets the severity.
    #[must_use]
    pub const fn with_severity(mut self, severity: WarningSeverity) -> Self {
        self.severity = Some(severity);
        self
    }
}

// ============================================================================
// SECTION: Execution Metadata
// ============================================================================

/// Execution facts recorded for a result.
///
/// # Invariants
/// - Keys not modelled here survive a round trip through `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    /// Wall time of the invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    /// Version of the command that produced the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_version: Option<String>,
    /// Trace identifier of the invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Completion timestamp (RFC 3339 or epoch millis as text).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Additional handler-defined keys.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
