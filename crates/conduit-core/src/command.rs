// crates/conduit-core/src/command.rs
// ============================================================================
// Module: Command Definitions
// Description: Named, schema-validated operations and their handlers.
// Purpose: Bind an input schema, a handler, and discovery metadata.
// Dependencies: async-trait, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! A [`CommandDefinition`] is created at startup and owned by the registry.
//! It exposes three capabilities: `validate` input against its schema,
//! `handler` to execute, and `describe` for discovery listings. Handlers
//! implement [`CommandHandler`]; plain async closures adapt through
//! [`handler_fn`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::context::CommandContext;
use crate::result::CommandResult;
use crate::schema::FieldError;
use crate::schema::InputSchema;
use crate::streaming::ChunkStream;

// ============================================================================
// SECTION: Handler Contract
// ============================================================================

/// What a handler produces.
pub enum CommandOutput {
    /// One result.
    Single(CommandResult),
    /// A chunk sequence ending in a terminal chunk.
    Stream(ChunkStream),
}

impl From<CommandResult> for CommandOutput {
    fn from(result: CommandResult) -> Self {
        Self::Single(result)
    }
}

impl From<ChunkStream> for CommandOutput {
    fn from(stream: ChunkStream) -> Self {
        Self::Stream(stream)
    }
}

/// Unexpected handler failure.
///
/// The registry converts it to an `INTERNAL_ERROR` result; the message is
/// diagnostic and only reaches callers when internal errors are exposed.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    /// Diagnostic message.
    message: String,
}

impl HandlerError {
    /// Creates a handler error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("json error: {err}"))
    }
}

/// Command behavior.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Executes the command with validated input.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] for unexpected failures. Expected failures
    /// belong in a failed [`CommandResult`].
    async fn handle(
        &self,
        input: Value,
        context: CommandContext,
    ) -> Result<CommandOutput, HandlerError>;
}

/// Handler backed by an async closure.
pub struct FnHandler<F> {
    /// Wrapped closure.
    func: F,
}

/// Adapts an async closure into a [`CommandHandler`].
pub const fn handler_fn<F, Fut>(func: F) -> FnHandler<F>
where
    F: Fn(Value, CommandContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<CommandOutput, HandlerError>> + Send,
{
    FnHandler {
        func,
    }
}

#[async_trait]
impl<F, Fut> CommandHandler for FnHandler<F>
where
    F: Fn(Value, CommandContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<CommandOutput, HandlerError>> + Send,
{
    async fn handle(
        &self,
        input: Value,
        context: CommandContext,
    ) -> Result<CommandOutput, HandlerError> {
        (self.func)(input, context).await
    }
}

// ============================================================================
// SECTION: Definition
// ============================================================================

/// Discovery entry published by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDescriptor {
    /// Command name.
    pub name: String,
    /// What the command does.
    pub description: String,
    /// JSON Schema of the input.
    pub input_schema: Value,
    /// Grouping label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// True when the command has side effects.
    #[serde(default)]
    pub mutation: bool,
    /// Command version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// True when the command streams chunks.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub streaming: bool,
}

/// Static description plus behavior of one command.
///
/// # Invariants
/// - Immutable once registered.
pub struct CommandDefinition {
    /// Unique namespaced name.
    name: String,
    /// What the command does.
    description: String,
    /// Compiled input schema.
    input_schema: InputSchema,
    /// Behavior.
    handler: Arc<dyn CommandHandler>,
    /// True when the command has side effects.
    mutation: bool,
    /// Free-form tags.
    tags: Vec<String>,
    /// Command version.
    version: Option<String>,
    /// Grouping label.
    category: Option<String>,
    /// True when the handler streams chunks.
    streaming: bool,
}

impl CommandDefinition {
    /// Creates a non-mutating command definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: InputSchema,
        handler: impl CommandHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler: Arc::new(handler),
            mutation: false,
            tags: Vec::new(),
            version: None,
            category: None,
            streaming: false,
        }
    }

    /// Marks the command as having side effects.
    #[must_use]
    pub const fn as_mutation(mut self) -> Self {
        self.mutation = true;
        self
    }

    /// Marks the command as streaming.
    #[must_use]
    pub const fn as_streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// Sets the grouping label.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Sets the tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Returns the command name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the grouping label.
    #[must_use]
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// Returns the tags.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Returns the version.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Returns true when the command has side effects.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        self.mutation
    }

    /// Returns the input schema.
    #[must_use]
    pub const fn input_schema(&self) -> &InputSchema {
        &self.input_schema
    }

    /// Returns a shared handle to the handler.
    #[must_use]
    pub fn handler(&self) -> Arc<dyn CommandHandler> {
        Arc::clone(&self.handler)
    }

    /// Validates raw input against the schema.
    ///
    /// # Errors
    ///
    /// Returns the schema violations found.
    pub fn validate(&self, input: &Value) -> Result<(), Vec<FieldError>> {
        self.input_schema.validate(input)
    }

    /// Builds the discovery descriptor.
    #[must_use]
    pub fn describe(&self) -> CommandDescriptor {
        CommandDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.document().clone(),
            category: self.category.clone(),
            tags: self.tags.clone(),
            mutation: self.mutation,
            version: self.version.clone(),
            streaming: self.streaming,
        }
    }
}

impl fmt::Debug for CommandDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDefinition")
            .field("name", &self.name)
            .field("mutation", &self.mutation)
            .field("tags", &self.tags)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Returns true for lowercase names made of alphanumeric segments joined by
/// `.`, `-`, or `_`, starting with a letter.
#[must_use]
pub fn is_valid_command_name(name: &str) -> bool {
    let mut previous_separator = true;
    for (index, ch) in name.chars().enumerate() {
        match ch {
            'a'..='z' => previous_separator = false,
            '0'..='9' if index > 0 => previous_separator = false,
            '.' | '-' | '_' if !previous_separator => previous_separator = true,
            _ => return false,
        }
    }
    !previous_separator
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use serde_json::json;

    use super::CommandDefinition;
    use super::CommandOutput;
    use super::handler_fn;
    use super::is_valid_command_name;
    use crate::result::CommandResult;
    use crate::schema::InputSchema;

    #[test]
    fn command_names_follow_namespacing_rules() {
        for name in ["echo", "todo.create", "meta-help", "v2.items_list", "a1.b2"] {
            assert!(is_valid_command_name(name), "{name} should be valid");
        }
        for name in ["", "Echo", ".echo", "echo.", "todo..create", "1abc", "todo.-x", "a b"] {
            assert!(!is_valid_command_name(name), "{name} should be invalid");
        }
    }

    #[test]
    fn describe_projects_metadata() {
        let definition = CommandDefinition::new(
            "todo.create",
            "Create a todo",
            InputSchema::object(json!({ "title": { "type": "string" } }), &["title"]).unwrap(),
            handler_fn(|input, _ctx| async move {
                Ok(CommandOutput::Single(CommandResult::success(input)))
            }),
        )
        .as_mutation()
        .with_category("todo")
        .with_tags(["write"])
        .with_version("1.0.0");
        let descriptor = serde_json::to_value(definition.describe()).unwrap();
        assert_eq!(
            descriptor,
            json!({
                "name": "todo.create",
                "description": "Create a todo",
                "inputSchema": {
                    "type": "object",
                    "properties": { "title": { "type": "string" } },
                    "required": ["title"]
                },
                "category": "todo",
                "tags": ["write"],
                "mutation": true,
                "version": "1.0.0"
            })
        );
    }
}
