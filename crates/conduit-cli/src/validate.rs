// crates/conduit-cli/src/validate.rs
// ============================================================================
// Module: Command Definition Lints
// Description: Checks served command descriptors for common mistakes.
// Purpose: Back `conduit validate` with deterministic findings.
// Dependencies: jsonschema, conduit-core
// ============================================================================

//! ## Overview
//! Errors: empty description, input schema that is not an object schema or
//! does not compile. Warnings: names without a namespace, very short
//! descriptions, missing category. Warnings fail validation only in strict
//! mode.

// ============================================================================
// SECTION: Imports
// ============================================================================

use conduit_core::CommandDescriptor;
use jsonschema::Draft;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Descriptions shorter than this draw a warning.
const MIN_DESCRIPTION_CHARS: usize = 10;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Finding severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Always fails validation.
    Error,
    /// Fails validation in strict mode.
    Warning,
}

impl Severity {
    /// Returns the display label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }
}

/// One lint finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    /// Command the finding is about.
    pub command: String,
    /// Severity.
    pub severity: Severity,
    /// What is wrong.
    pub message: String,
}

/// Lint results over a command listing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    /// Commands checked.
    pub checked: usize,
    /// Findings in listing order.
    pub findings: Vec<Finding>,
}

impl Report {
    /// Returns true when the report fails under the given strictness.
    #[must_use]
    pub fn fails(&self, strict: bool) -> bool {
        self.findings
            .iter()
            .any(|finding| finding.severity == Severity::Error || strict)
    }
}

// ============================================================================
// SECTION: Lints
// ============================================================================

/// Lints every descriptor.
#[must_use]
pub fn lint(descriptors: &[CommandDescriptor]) -> Report {
    let mut findings = Vec::new();
    for descriptor in descriptors {
        lint_one(descriptor, &mut findings);
    }
    Report {
        checked: descriptors.len(),
        findings,
    }
}

/// Lints one descriptor.
fn lint_one(descriptor: &CommandDescriptor, findings: &mut Vec<Finding>) {
    let mut push = |severity: Severity, message: String| {
        findings.push(Finding {
            command: descriptor.name.clone(),
            severity,
            message,
        });
    };
    if !descriptor.name.contains('.') {
        push(Severity::Warning, "name has no namespace (expected `group.action`)".to_string());
    }
    let description = descriptor.description.trim();
    if description.is_empty() {
        push(Severity::Error, "description is empty".to_string());
    } else if description.chars().count() < MIN_DESCRIPTION_CHARS {
        push(Severity::Warning, "description is very short".to_string());
    }
    if descriptor.category.is_none() {
        push(Severity::Warning, "no category".to_string());
    }
    if descriptor.input_schema.get("type").and_then(Value::as_str) != Some("object") {
        push(Severity::Error, "input schema must have type `object`".to_string());
    }
    if let Err(err) =
        jsonschema::options().with_draft(Draft::Draft202012).build(&descriptor.input_schema)
    {
        push(Severity::Error, format!("input schema does not compile: {err}"));
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
