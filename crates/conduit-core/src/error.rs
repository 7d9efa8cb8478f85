// crates/conduit-core/src/error.rs
// ============================================================================
// Module: Command Errors
// Description: Structured failure payload returned by every command.
// Purpose: Give callers a stable machine code plus human guidance.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! [`CommandError`] is the failure half of the result contract. It is built
//! once at the failure site and serialized verbatim to the caller. The
//! [`error_codes`] catalogue holds the stable codes used across the
//! workspace; constructors on [`CommandError`] set the retryable flag each
//! code carries by default.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Error Codes
// ============================================================================

/// Stable machine-readable error codes.
pub mod error_codes {
    /// Input failed schema validation.
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    /// A resource referenced by the input does not exist.
    pub const NOT_FOUND: &str = "NOT_FOUND";
    /// The requested command is not registered.
    pub const COMMAND_NOT_FOUND: &str = "COMMAND_NOT_FOUND";
    /// A command with the same name is already registered.
    pub const DUPLICATE_COMMAND: &str = "DUPLICATE_COMMAND";
    /// A handler failed unexpectedly.
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    /// The caller exceeded a rate limit.
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
    /// The call exceeded its deadline.
    pub const TIMEOUT: &str = "TIMEOUT";
    /// A network dependency was unreachable.
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    /// An upstream service reported a server-side failure.
    pub const UPSTREAM_ERROR: &str = "UPSTREAM_ERROR";
    /// Credentials were missing or rejected.
    pub const AUTH_ERROR: &str = "AUTH_ERROR";
    /// A batch item was not run because an earlier item failed.
    pub const COMMAND_SKIPPED: &str = "COMMAND_SKIPPED";
    /// The caller cancelled the call.
    pub const COMMAND_CANCELLED: &str = "COMMAND_CANCELLED";
    /// A batch request was malformed.
    pub const INVALID_BATCH_REQUEST: &str = "INVALID_BATCH_REQUEST";
    /// A pipeline request was malformed.
    pub const INVALID_PIPELINE_REQUEST: &str = "INVALID_PIPELINE_REQUEST";
}

// ============================================================================
// SECTION: Types
// ============================================================================

/// Structured command failure.
///
/// # Invariants
/// - `code` is one of the stable labels in [`error_codes`] or a
///   command-specific uppercase label.
/// - Absent optional fields are omitted from the wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable explanation.
    pub message: String,
    /// Actionable recovery hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Whether retrying with identical input might succeed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    /// Structured diagnostic payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl CommandError {
    /// Creates an error with a code and message.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            suggestion: None,
            retryable: None,
            details: None,
        }
    }

    /// Attaches a recovery suggestion.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Sets the retryable flag.
    #[must_use]
    pub const fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    /// Attaches a structured diagnostic payload.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Returns true when the error is flagged retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryable.unwrap_or(false)
    }

    /// Input failed validation. Not retryable.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(error_codes::VALIDATION_ERROR, message)
            .with_retryable(false)
            .with_suggestion("Fix the input and try again")
    }

    /// A referenced resource was not found. Not retryable.
    #[must_use]
    pub fn not_found(resource: &str, id: &str) -> Self {
        Self::new(error_codes::NOT_FOUND, format!("{resource} '{id}' was not found"))
            .with_retryable(false)
            .with_details(json!({ "resource": resource, "id": id }))
    }

    /// The requested command is not registered.
    ///
    /// `suggestions` should be ordered best match first; the first entry is
    /// surfaced in the human-readable suggestion.
    #[must_use]
    pub fn command_not_found(name: &str, suggestions: &[String]) -> Self {
        let suggestion = match suggestions {
            [] => "Run 'meta.help' to list available commands".to_string(),
            [only] => format!("Did you mean '{only}'?"),
            [first, rest @ ..] => {
                format!("Did you mean '{first}'? Other matches: {}", rest.join(", "))
            }
        };
        Self::new(error_codes::COMMAND_NOT_FOUND, format!("Command '{name}' is not registered"))
            .with_retryable(false)
            .with_suggestion(suggestion)
            .with_details(json!({ "command": name, "suggestions": suggestions }))
    }

    /// A handler failed unexpectedly. Not retryable.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(error_codes::INTERNAL_ERROR, message).with_retryable(false)
    }

    /// The caller exceeded a rate limit. Retryable.
    #[must_use]
    pub fn rate_limited(retry_after_ms: u64) -> Self {
        Self::new(error_codes::RATE_LIMITED, "Rate limit exceeded")
            .with_retryable(true)
            .with_suggestion(format!("Retry after {retry_after_ms}ms"))
            .with_details(json!({ "retryAfterMs": retry_after_ms }))
    }

    /// The call exceeded its deadline. Retryable.
    #[must_use]
    pub fn timeout(operation: &str, timeout_ms: u64) -> Self {
        Self::new(error_codes::TIMEOUT, format!("'{operation}' timed out after {timeout_ms}ms"))
            .with_retryable(true)
            .with_suggestion("Try again or raise the timeout")
            .with_details(json!({ "timeoutMs": timeout_ms }))
    }

    /// A network dependency was unreachable. Retryable.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(error_codes::NETWORK_ERROR, message).with_retryable(true)
    }

    /// An upstream service failed. Retryable.
    #[must_use]
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(error_codes::UPSTREAM_ERROR, message).with_retryable(true)
    }

    /// Credentials were missing or rejected. Never retried automatically.
    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(error_codes::AUTH_ERROR, message)
            .with_retryable(false)
            .with_suggestion("Check credentials before retrying")
    }

    /// The caller cancelled the call.
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(error_codes::COMMAND_CANCELLED, message).with_retryable(true)
    }

    /// A batch item was skipped after an earlier failure.
    #[must_use]
    pub fn skipped(failed_index: usize) -> Self {
        Self::new(
            error_codes::COMMAND_SKIPPED,
            format!("Skipped because batch item {failed_index} failed"),
        )
        .with_retryable(true)
        .with_suggestion("Fix the failing command or set continueOnError")
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CommandError {}

// ============================================================================
// SECTION: Tests
// ============================================================================
