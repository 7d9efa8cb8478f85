// crates/conduit-core/src/result.rs
// ============================================================================
// Module: Command Result
// Description: Tagged outcome of a single command invocation.
// Purpose: Enforce the data/error exclusivity of the result contract.
// Dependencies: serde, serde_json, crate::{error, metadata}
// ============================================================================

//! ## Overview
//! [`CommandResult`] is what every command returns on every transport. The
//! success/failure split is carried by [`Outcome`], so a result holding both
//! data and an error (or neither) cannot be constructed. On the wire the
//! result is a camelCase object with a `success` discriminant, exactly one
//! of `data`/`error`, and optional trust fields that are omitted when
//! absent. Decoding rejects payloads that break the exclusivity rule.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde_json::Value;

use crate::error::CommandError;
use crate::metadata::Alternative;
use crate::metadata::PlanStep;
use crate::metadata::ResultMetadata;
use crate::metadata::Source;
use crate::metadata::Warning;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Success or failure payload of a result.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The command succeeded with data.
    Success(T),
    /// The command failed.
    Failure(CommandError),
}

/// Optional trust and UX fields accepted by [`CommandResult::success_with`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultOptions {
    /// Caller-facing trust score between 0 and 1.
    pub confidence: Option<f64>,
    /// Free-text explanation.
    pub reasoning: Option<String>,
    /// Ordered attributions.
    pub sources: Option<Vec<Source>>,
    /// Steps taken.
    pub plan: Option<Vec<PlanStep>>,
    /// Rejected candidates.
    pub alternatives: Option<Vec<Alternative>>,
    /// Non-fatal notices.
    pub warnings: Option<Vec<Warning>>,
    /// Execution facts.
    pub metadata: Option<ResultMetadata>,
}

/// Outcome of one command invocation.
///
/// # Invariants
/// - Exactly one of data or error is present.
/// - `confidence`, when present, lies in `0.0..=1.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult<T = Value> {
    /// Success or failure payload.
    outcome: Outcome<T>,
    /// Caller-facing trust score.
    pub confidence: Option<f64>,
    /// Free-text explanation.
    pub reasoning: Option<String>,
    /// Ordered attributions.
    pub sources: Option<Vec<Source>>,
    /// Steps taken.
    pub plan: Option<Vec<PlanStep>>,
    /// Rejected candidates.
    pub alternatives: Option<Vec<Alternative>>,
    /// Non-fatal notices.
    pub warnings: Option<Vec<Warning>>,
    /// Execution facts.
    pub metadata: Option<ResultMetadata>,
}

impl<T> CommandResult<T> {
    /// Creates a result from an outcome with no optional fields.
    const fn from_outcome(outcome: Outcome<T>) -> Self {
        Self {
            outcome,
            confidence: None,
            reasoning: None,
            sources: None,
            plan: None,
            alternatives: None,
            warnings: None,
            metadata: None,
        }
    }

    /// Creates a successful result.
    #[must_use]
    pub const fn success(data: T) -> Self {
        Self::from_outcome(Outcome::Success(data))
    }

    /// Creates a successful result with optional fields.
    #[must_use]
    pub fn success_with(data: T, options: ResultOptions) -> Self {
        Self {
            outcome: Outcome::Success(data),
            confidence: options.confidence.map(clamp_confidence),
            reasoning: options.reasoning,
            sources: options.sources,
            plan: options.plan,
            alternatives: options.alternatives,
            warnings: options.warnings,
            metadata: options.metadata,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub const fn failure(error: CommandError) -> Self {
        Self::from_outcome(Outcome::Failure(error))
    }

    /// Returns true for successful results.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    /// Returns the success payload.
    #[must_use]
    pub const fn data(&self) -> Option<&T> {
        match &self.outcome {
            Outcome::Success(data) => Some(data),
            Outcome::Failure(_) => None,
        }
    }

    /// Returns the failure payload.
    #[must_use]
    pub const fn error(&self) -> Option<&CommandError> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Failure(error) => Some(error),
        }
    }

    /// Returns the outcome.
    #[must_use]
    pub const fn outcome(&self) -> &Outcome<T> {
        &self.outcome
    }

    /// Consumes the result, returning the outcome.
    #[must_use]
    pub fn into_outcome(self) -> Outcome<T> {
        self.outcome
    }

    /// Sets the confidence score, clamped to 0..=1.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(clamp_confidence(confidence));
        self
    }

    /// Sets the reasoning text.
    #[must_use]
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Sets the source attributions.
    #[must_use]
    pub fn with_sources(mut self, sources: Vec<Source>) -> Self {
        self.sources = Some(sources);
        self
    }

    /// Appends a warning.
    #[must_use]
    pub fn with_warning(mut self, warning: Warning) -> Self {
        self.warnings.get_or_insert_with(Vec::new).push(warning);
        self
    }

    /// Returns metadata for in-place updates, creating it when absent.
    pub fn metadata_mut(&mut self) -> &mut ResultMetadata {
        self.metadata.get_or_insert_with(ResultMetadata::default)
    }

    /// Converts the success payload, keeping every other field.
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CommandResult<U> {
        let outcome = match self.outcome {
            Outcome::Success(data) => Outcome::Success(f(data)),
            Outcome::Failure(error) => Outcome::Failure(error),
        };
        CommandResult {
            outcome,
            confidence: self.confidence,
            reasoning: self.reasoning,
            sources: self.sources,
            plan: self.plan,
            alternatives: self.alternatives,
            warnings: self.warnings,
            metadata: self.metadata,
        }
    }
}

impl<T: Serialize> CommandResult<T> {
    /// Converts a typed result into a JSON-valued result.
    ///
    /// A payload that cannot be represented as JSON becomes an
    /// `INTERNAL_ERROR` failure.
    #[must_use]
    pub fn into_value(self) -> CommandResult<Value> {
        let encoded = match &self.outcome {
            Outcome::Success(data) => Some(serde_json::to_value(data)),
            Outcome::Failure(_) => None,
        };
        match encoded {
            Some(Err(err)) => CommandResult::failure(CommandError::internal(format!(
                "result payload is not representable as JSON: {err}"
            ))),
            Some(Ok(value)) => self.map(|_| value),
            None => self.map(|_| Value::Null),
        }
    }
}

impl<T> From<Result<T, CommandError>> for CommandResult<T> {
    fn from(value: Result<T, CommandError>) -> Self {
        match value {
            Ok(data) => Self::success(data),
            Err(error) => Self::failure(error),
        }
    }
}

/// Clamps a confidence score into 0..=1, mapping NaN to 0.
fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

// ============================================================================
// SECTION: Serialization
// ============================================================================

impl<T: Serialize> Serialize for CommandResult<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match &self.outcome {
            Outcome::Success(data) => {
                map.serialize_entry("success", &true)?;
                map.serialize_entry("data", data)?;
            }
            Outcome::Failure(error) => {
                map.serialize_entry("success", &false)?;
                map.serialize_entry("error", error)?;
            }
        }
        if let Some(confidence) = &self.confidence {
            map.serialize_entry("confidence", confidence)?;
        }
        if let Some(reasoning) = &self.reasoning {
            map.serialize_entry("reasoning", reasoning)?;
        }
        if let Some(sources) = &self.sources {
            map.serialize_entry("sources", sources)?;
        }
        if let Some(plan) = &self.plan {
            map.serialize_entry("plan", plan)?;
        }
        if let Some(alternatives) = &self.alternatives {
            map.serialize_entry("alternatives", alternatives)?;
        }
        if let Some(warnings) = &self.warnings {
            map.serialize_entry("warnings", warnings)?;
        }
        if let Some(metadata) = &self.metadata {
            map.serialize_entry("metadata", metadata)?;
        }
        map.end()
    }
}

/// Wire form accepted before the exclusivity check.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
struct RawResult<T> {
    /// Discriminant.
    success: bool,
    /// Success payload; `Some(null)` when the field is present but null.
    #[serde(default, deserialize_with = "deserialize_present")]
    data: Option<T>,
    /// Failure payload.
    #[serde(default)]
    error: Option<CommandError>,
    /// Trust score.
    #[serde(default)]
    confidence: Option<f64>,
    /// Explanation.
    #[serde(default)]
    reasoning: Option<String>,
    /// Attributions.
    #[serde(default)]
    sources: Option<Vec<Source>>,
    /// Steps.
    #[serde(default)]
    plan: Option<Vec<PlanStep>>,
    /// Candidates.
    #[serde(default)]
    alternatives: Option<Vec<Alternative>>,
    /// Notices.
    #[serde(default)]
    warnings: Option<Vec<Warning>>,
    /// Execution facts.
    #[serde(default)]
    metadata: Option<ResultMetadata>,
}

/// Deserializes a present field as `Some`, even when it is JSON null.
fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for CommandResult<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawResult::<T>::deserialize(deserializer)?;
        let outcome = match (raw.success, raw.data, raw.error) {
            (true, Some(data), None) => Outcome::Success(data),
            (false, None, Some(error)) => Outcome::Failure(error),
            (_, Some(_), Some(_)) => {
                return Err(D::Error::custom("result carries both data and error"));
            }
            (_, None, None) => {
                return Err(D::Error::custom("result carries neither data nor error"));
            }
            (success, _, _) => {
                return Err(D::Error::custom(format!(
                    "success flag {success} disagrees with the populated field"
                )));
            }
        };
        Ok(Self {
            outcome,
            confidence: raw.confidence.map(clamp_confidence),
            reasoning: raw.reasoning,
            sources: raw.sources,
            plan: raw.plan,
            alternatives: raw.alternatives,
            warnings: raw.warnings,
            metadata: raw.metadata,
        })
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
