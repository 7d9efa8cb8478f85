// crates/conduit-cli/src/args.rs
// ============================================================================
// Module: CLI Argument Parsing
// Description: Command arguments as JSON or key=value pairs.
// Purpose: Turn shell words into command input objects and batch items.
// Dependencies: serde_json, conduit-core
// ============================================================================

//! ## Overview
//! A single word starting with `{` is parsed as a JSON object. Otherwise
//! each word is `key=value`; values that parse as JSON keep their JSON type
//! (`n=3` is a number, `flag=true` a boolean) and anything else is a string.
//! Batch items are written `command:args`, where args is a JSON object or
//! comma-separated `key=value` pairs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use conduit_core::BatchItem;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Argument parsing failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgsError {
    /// JSON arguments did not parse or were not an object.
    #[error("arguments must be a JSON object: {0}")]
    Json(String),
    /// A word lacked `=` or had an empty key.
    #[error("expected key=value, got `{0}`")]
    Pair(String),
    /// A batch item lacked a command name.
    #[error("batch item `{0}` needs a command name")]
    BatchItem(String),
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

/// Parses command arguments from shell words.
///
/// # Errors
///
/// Returns [`ArgsError`] when the words are neither a JSON object nor
/// `key=value` pairs.
pub fn parse_args(words: &[String]) -> Result<Value, ArgsError> {
    match words {
        [] => Ok(Value::Object(Map::new())),
        [single] if single.trim_start().starts_with('{') => parse_json_object(single),
        _ => parse_pairs(words.iter().map(String::as_str)),
    }
}

/// Parses one `command:args` batch item.
///
/// # Errors
///
/// Returns [`ArgsError`] for an empty command name or malformed args.
pub fn parse_batch_item(word: &str) -> Result<BatchItem, ArgsError> {
    let (command, args) = word.split_once(':').unwrap_or((word, ""));
    let command = command.trim();
    if command.is_empty() {
        return Err(ArgsError::BatchItem(word.to_string()));
    }
    let args = args.trim();
    let input = if args.is_empty() {
        Value::Object(Map::new())
    } else if args.starts_with('{') {
        parse_json_object(args)?
    } else {
        parse_pairs(args.split(',').map(str::trim).filter(|pair| !pair.is_empty()))?
    };
    Ok(BatchItem::new(command, input))
}

/// Parses a JSON object.
fn parse_json_object(text: &str) -> Result<Value, ArgsError> {
    let value: Value = serde_json::from_str(text).map_err(|err| ArgsError::Json(err.to_string()))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(ArgsError::Json("not an object".to_string()))
    }
}

/// Parses `key=value` pairs into an object.
fn parse_pairs<'a>(pairs: impl Iterator<Item = &'a str>) -> Result<Value, ArgsError> {
    let mut object = Map::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            return Err(ArgsError::Pair(pair.to_string()));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(ArgsError::Pair(pair.to_string()));
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        object.insert(key.to_string(), value);
    }
    Ok(Value::Object(object))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use serde_json::json;

    use super::ArgsError;
    use super::parse_args;
    use super::parse_batch_item;

    fn words(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| (*item).to_string()).collect()
    }

    #[test]
    fn key_value_pairs_keep_json_types() {
        let args = parse_args(&words(&["a=1", "b=2.5", "flag=true", "name=ada", "list=[1,2]"]));
        assert_eq!(
            args.unwrap(),
            json!({ "a": 1, "b": 2.5, "flag": true, "name": "ada", "list": [1, 2] })
        );
    }

    #[test]
    fn single_json_word_is_an_object() {
        assert_eq!(parse_args(&words(&[r#"{"msg":"hi"}"#])).unwrap(), json!({ "msg": "hi" }));
        assert!(matches!(parse_args(&words(&["{oops"])), Err(ArgsError::Json(_))));
        assert_eq!(parse_args(&[]).unwrap(), json!({}));
    }

    #[test]
    fn words_without_equals_are_rejected() {
        assert_eq!(parse_args(&words(&["loose"])), Err(ArgsError::Pair("loose".to_string())));
        assert_eq!(parse_args(&words(&["=1"])), Err(ArgsError::Pair("=1".to_string())));
    }

    #[test]
    fn batch_items_accept_pairs_json_or_nothing() {
        let item = parse_batch_item("math.add:a=1,b=2").unwrap();
        assert_eq!(item.command, "math.add");
        assert_eq!(item.input, json!({ "a": 1, "b": 2 }));
        let item = parse_batch_item(r#"echo:{"msg":"a:b"}"#).unwrap();
        assert_eq!(item.input, json!({ "msg": "a:b" }));
        assert_eq!(parse_batch_item("meta.help").unwrap().input, json!({}));
        assert!(parse_batch_item(":a=1").is_err());
    }
}
