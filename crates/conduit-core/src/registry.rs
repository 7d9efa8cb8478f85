// crates/conduit-core/src/registry.rs
// ============================================================================
// Module: Command Registry
// Description: Name-indexed command store with the lookup/validate/invoke gate.
// Purpose: Run commands so that handler failures never escape as crashes.
// Dependencies: serde_json, thiserror, tokio, tracing, crate::{command, bootstrap}
// ============================================================================

//! ## Overview
//! The registry is built once at startup and read concurrently afterwards
//! without locks. [`CommandRegistry::execute`] is a three-step gate:
//! unknown names fail with `COMMAND_NOT_FOUND` plus close-match
//! suggestions, input that fails the schema fails with `VALIDATION_ERROR`
//! without reaching the handler, and handler errors or panics become
//! `INTERNAL_ERROR` results. Handlers run on their own task so a panic is
//! contained to that call.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::bootstrap;
use crate::command::CommandDefinition;
use crate::command::CommandDescriptor;
use crate::command::CommandOutput;
use crate::command::is_valid_command_name;
use crate::context::CommandContext;
use crate::error::CommandError;
use crate::error::error_codes;
use crate::result::CommandResult;
use crate::streaming::ChunkStream;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum edit distance for command name suggestions.
const MAX_SUGGESTION_DISTANCE: usize = 2;
/// Maximum number of suggestions returned.
const MAX_SUGGESTIONS: usize = 3;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Registration failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A command with the same name exists.
    #[error("command '{0}' is already registered")]
    DuplicateCommand(String),
    /// The name breaks the namespacing rules.
    #[error("invalid command name '{0}': use lowercase segments joined by '.', '-' or '_'")]
    InvalidName(String),
    /// Built-in commands could not be created.
    #[error("failed to install built-in commands: {0}")]
    Bootstrap(String),
}

impl RegistryError {
    /// Returns a stable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DuplicateCommand(_) => error_codes::DUPLICATE_COMMAND,
            Self::InvalidName(_) => "INVALID_COMMAND_NAME",
            Self::Bootstrap(_) => error_codes::INTERNAL_ERROR,
        }
    }
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Registry behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Include handler diagnostics in `INTERNAL_ERROR` details.
    pub expose_internal_errors: bool,
}

/// Mapping from command name to definition.
///
/// # Invariants
/// - Names are unique.
/// - Listing order is registration order.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    /// Definitions in registration order.
    commands: Vec<Arc<CommandDefinition>>,
    /// Name to position in `commands`.
    index: HashMap<String, usize>,
    /// Behavior switches.
    options: RegistryOptions,
}

impl CommandRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry with options.
    #[must_use]
    pub fn with_options(options: RegistryOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Registers a command.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateCommand`] when the name is taken and
    /// [`RegistryError::InvalidName`] when it breaks the naming rules.
    pub fn register(&mut self, definition: CommandDefinition) -> Result<(), RegistryError> {
        let name = definition.name().to_string();
        if !is_valid_command_name(&name) {
            return Err(RegistryError::InvalidName(name));
        }
        if self.index.contains_key(&name) || bootstrap::is_reserved(&name) {
            return Err(RegistryError::DuplicateCommand(name));
        }
        self.insert(definition);
        Ok(())
    }

    /// Stores a definition without checks.
    fn insert(&mut self, definition: CommandDefinition) {
        self.index.insert(definition.name().to_string(), self.commands.len());
        self.commands.push(Arc::new(definition));
    }

    /// Freezes the registry and installs the built-in `meta.*` commands.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Bootstrap`] when a built-in command cannot be
    /// created.
    pub fn into_shared(self) -> Result<Arc<Self>, RegistryError> {
        let mut failure = None;
        let mut registry = self;
        let shared = Arc::new_cyclic(|weak| {
            match bootstrap::definitions(weak) {
                Ok(definitions) => {
                    for definition in definitions {
                        registry.insert(definition);
                    }
                }
                Err(err) => failure = Some(err),
            }
            registry
        });
        match failure {
            Some(err) => Err(RegistryError::Bootstrap(err.to_string())),
            None => Ok(shared),
        }
    }

    /// Returns the definition for a name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CommandDefinition> {
        self.index.get(name).and_then(|position| self.commands.get(*position)).map(Arc::as_ref)
    }

    /// Returns true when a command is registered under the name.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Returns the number of registered commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true when no command is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Iterates definitions in registration order.
    pub fn list(&self) -> impl Iterator<Item = &CommandDefinition> {
        self.commands.iter().map(Arc::as_ref)
    }

    /// Returns discovery descriptors in registration order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<CommandDescriptor> {
        self.list().map(CommandDefinition::describe).collect()
    }

    /// Returns registered names ranked by similarity to `name`.
    #[must_use]
    pub fn suggest(&self, name: &str) -> Vec<String> {
        let wanted = name.to_ascii_lowercase();
        let mut ranked: Vec<(usize, &str)> = self
            .list()
            .map(|definition| (edit_distance(&wanted, definition.name()), definition.name()))
            .filter(|(distance, _)| *distance <= MAX_SUGGESTION_DISTANCE)
            .collect();
        ranked.sort_unstable();
        ranked.into_iter().take(MAX_SUGGESTIONS).map(|(_, name)| name.to_string()).collect()
    }

    /// Executes a command through the lookup, validate, invoke gate.
    ///
    /// Streaming handlers are drained and their terminal outcome returned.
    pub async fn execute(
        &self,
        name: &str,
        input: Value,
        context: CommandContext,
    ) -> CommandResult {
        let (definition, input) = match self.admit(name, input) {
            Ok(admitted) => admitted,
            Err(error) => return CommandResult::failure(error),
        };
        match self.invoke(&definition, input, context).await {
            Ok(CommandOutput::Single(result)) => result,
            Ok(CommandOutput::Stream(stream)) => stream.collect_result().await,
            Err(error) => CommandResult::failure(error),
        }
    }

    /// Executes a command as a chunk stream.
    ///
    /// Single-result handlers yield one terminal chunk.
    pub async fn execute_stream(
        &self,
        name: &str,
        input: Value,
        context: CommandContext,
    ) -> ChunkStream {
        let (definition, input) = match self.admit(name, input) {
            Ok(admitted) => admitted,
            Err(error) => return ChunkStream::failed(error),
        };
        match self.invoke(&definition, input, context).await {
            Ok(CommandOutput::Single(result)) => ChunkStream::from_result(result),
            Ok(CommandOutput::Stream(stream)) => stream,
            Err(error) => ChunkStream::failed(error),
        }
    }

    /// Looks up and validates a call, normalizing absent input to `{}`.
    fn admit(
        &self,
        name: &str,
        input: Value,
    ) -> Result<(Arc<CommandDefinition>, Value), CommandError> {
        let found = self.index.get(name).and_then(|position| self.commands.get(*position));
        let Some(definition) = found else {
            let suggestions = self.suggest(name);
            tracing::debug!(command = name, suggestions = suggestions.len(), "unknown command");
            return Err(CommandError::command_not_found(name, &suggestions));
        };
        let input = if input.is_null() { Value::Object(Map::new()) } else { input };
        if let Err(errors) = definition.validate(&input) {
            let summary =
                errors.iter().map(|error| error.message.as_str()).collect::<Vec<_>>().join("; ");
            return Err(CommandError::validation(format!("Invalid input for '{name}': {summary}"))
                .with_details(json!({ "command": name, "errors": errors })));
        }
        Ok((Arc::clone(definition), input))
    }

    /// Runs the handler on its own task, converting failures to errors.
    async fn invoke(
        &self,
        definition: &CommandDefinition,
        input: Value,
        context: CommandContext,
    ) -> Result<CommandOutput, CommandError> {
        let handler = definition.handler();
        let task = tokio::spawn(async move { handler.handle(input, context).await });
        match task.await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(self.internal_error(definition.name(), &err.to_string())),
            Err(join_error) => {
                let diagnostic = if join_error.is_panic() {
                    format!("handler panicked: {}", panic_message(join_error.into_panic()))
                } else {
                    "handler task was aborted".to_string()
                };
                Err(self.internal_error(definition.name(), &diagnostic))
            }
        }
    }

    /// Builds the caller-facing error for an unexpected handler failure.
    fn internal_error(&self, name: &str, diagnostic: &str) -> CommandError {
        tracing::error!(command = name, diagnostic, "command handler failed");
        let error = CommandError::internal(format!("Command '{name}' failed unexpectedly"))
            .with_suggestion("Retrying with the same input is unlikely to help");
        if self.options.expose_internal_errors {
            error.with_details(json!({ "diagnostic": diagnostic }))
        } else {
            error
        }
    }
}

/// Extracts a printable message from a panic payload.
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    payload.downcast_ref::<String>().cloned().unwrap_or_else(|| "non-string panic".to_string())
}

/// Levenshtein distance, case-insensitive on ASCII.
fn edit_distance(left: &str, right: &str) -> usize {
    let left: Vec<char> = left.chars().map(|ch| ch.to_ascii_lowercase()).collect();
    let right: Vec<char> = right.chars().map(|ch| ch.to_ascii_lowercase()).collect();
    let mut previous: Vec<usize> = (0 ..= right.len()).collect();
    let mut current = vec![0; right.len() + 1];
    for (i, left_ch) in left.iter().enumerate() {
        current[0] = i + 1;
        for (j, right_ch) in right.iter().enumerate() {
            let substitution = previous[j] + usize::from(left_ch != right_ch);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[right.len()]
}

// ============================================================================
// SECTION: Tests
// ============================================================================
