// crates/conduit-core/src/schema.rs
// ============================================================================
// Module: Input Schema
// Description: Compiled JSON Schema guarding command input.
// Purpose: Validate raw input and expose the schema for discovery.
// Dependencies: jsonschema, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`InputSchema`] pairs a JSON Schema document (Draft 2020-12) with its
//! compiled validator. The document is what `tools/list` publishes; the
//! validator is what the registry runs before invoking a handler.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use jsonschema::Draft;
use jsonschema::Validator;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Maximum number of field errors reported for one input.
const MAX_FIELD_ERRORS: usize = 16;

/// One schema violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Human-readable description of the violation.
    pub message: String,
}

/// Schema compilation failure.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The schema is not a valid Draft 2020-12 document.
    #[error("invalid input schema: {0}")]
    Invalid(String),
}

/// Compiled input schema.
///
/// # Invariants
/// - `validator` was compiled from `document`.
pub struct InputSchema {
    /// Published schema document.
    document: Value,
    /// Compiled validator.
    validator: Validator,
}

impl InputSchema {
    /// Compiles a schema document.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Invalid`] when the document does not compile.
    pub fn new(document: Value) -> Result<Self, SchemaError> {
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&document)
            .map_err(|err| SchemaError::Invalid(err.to_string()))?;
        Ok(Self {
            document,
            validator,
        })
    }

    /// Builds an object schema from property schemas and required names.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Invalid`] when a property schema is invalid.
    pub fn object(properties: Value, required: &[&str]) -> Result<Self, SchemaError> {
        let mut document = Map::new();
        document.insert("type".to_string(), json!("object"));
        document.insert("properties".to_string(), properties);
        if !required.is_empty() {
            document.insert("required".to_string(), json!(required));
        }
        Self::new(Value::Object(document))
    }

    /// Schema accepting any object.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Invalid`] only if the validator rejects the
    /// trivial object schema.
    pub fn any_object() -> Result<Self, SchemaError> {
        Self::new(json!({ "type": "object" }))
    }

    /// Returns the published schema document.
    #[must_use]
    pub const fn document(&self) -> &Value {
        &self.document
    }

    /// Validates input against the schema.
    ///
    /// # Errors
    ///
    /// Returns the field errors found, capped at a fixed count.
    pub fn validate(&self, input: &Value) -> Result<(), Vec<FieldError>> {
        if self.validator.is_valid(input) {
            return Ok(());
        }
        let errors: Vec<FieldError> = self
            .validator
            .iter_errors(input)
            .take(MAX_FIELD_ERRORS)
            .map(|err| FieldError {
                message: err.to_string(),
            })
            .collect();
        if errors.is_empty() {
            return Err(vec![FieldError {
                message: "input does not match the schema".to_string(),
            }]);
        }
        Err(errors)
    }
}

impl fmt::Debug for InputSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputSchema").field("document", &self.document).finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use serde_json::json;

    use super::InputSchema;

    #[test]
    fn object_schema_enforces_required_fields() {
        let schema =
            InputSchema::object(json!({ "msg": { "type": "string" } }), &["msg"]).unwrap();
        assert!(schema.validate(&json!({ "msg": "hi" })).is_ok());
        let errors = schema.validate(&json!({})).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("msg"));
    }

    #[test]
    fn type_mismatches_are_reported() {
        let schema =
            InputSchema::object(json!({ "count": { "type": "integer" } }), &[]).unwrap();
        assert!(schema.validate(&json!({ "count": "three" })).is_err());
    }

    #[test]
    fn invalid_documents_fail_to_compile() {
        assert!(InputSchema::new(json!({ "type": "not-a-type" })).is_err());
    }
}
