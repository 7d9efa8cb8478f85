// crates/conduit-core/src/bootstrap.rs
// ============================================================================
// Module: Built-in Commands
// Description: Introspection commands installed in every shared registry.
// Purpose: Let callers discover commands, schemas, and docs at runtime.
// Dependencies: async-trait, serde, serde_json, crate::{command, registry}
// ============================================================================

//! ## Overview
//! Three non-mutating commands in the `meta` category:
//! - `meta.help` lists commands grouped by category with an optional filter.
//! - `meta.schema` returns the JSON Schemas of one or all commands.
//! - `meta.docs` renders markdown documentation from the definitions.
//!
//! The handlers hold a weak reference to the registry that owns them, so the
//! listing always reflects the frozen registry.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::Weak;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use crate::command::CommandDefinition;
use crate::command::CommandDescriptor;
use crate::command::CommandHandler;
use crate::command::CommandOutput;
use crate::command::HandlerError;
use crate::context::CommandContext;
use crate::error::CommandError;
use crate::registry::CommandRegistry;
use crate::result::CommandResult;
use crate::schema::InputSchema;
use crate::schema::SchemaError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Name of the help command.
pub const HELP_COMMAND: &str = "meta.help";
/// Name of the schema command.
pub const SCHEMA_COMMAND: &str = "meta.schema";
/// Name of the docs command.
pub const DOCS_COMMAND: &str = "meta.docs";
/// Category shared by the built-in commands.
pub const META_CATEGORY: &str = "meta";
/// Category used for commands without one.
const DEFAULT_CATEGORY: &str = "general";

/// Returns true for names owned by the built-in commands.
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    matches!(name, HELP_COMMAND | SCHEMA_COMMAND | DOCS_COMMAND)
}

/// Builds the built-in definitions bound to `registry`.
pub(crate) fn definitions(
    registry: &Weak<CommandRegistry>,
) -> Result<Vec<CommandDefinition>, SchemaError> {
    let help = CommandDefinition::new(
        HELP_COMMAND,
        "List available commands grouped by category",
        InputSchema::object(
            json!({
                "filter": {
                    "type": "string",
                    "description": "Substring matched against names, descriptions, and tags"
                },
                "format": { "type": "string", "enum": ["brief", "full"] }
            }),
            &[],
        )?,
        HelpHandler {
            registry: registry.clone(),
        },
    );
    let schema = CommandDefinition::new(
        SCHEMA_COMMAND,
        "Return JSON Schemas for one or all commands",
        InputSchema::object(json!({ "command": { "type": "string" } }), &[])?,
        SchemaHandler {
            registry: registry.clone(),
        },
    );
    let docs = CommandDefinition::new(
        DOCS_COMMAND,
        "Render markdown documentation for one or all commands",
        InputSchema::object(json!({ "command": { "type": "string" } }), &[])?,
        DocsHandler {
            registry: registry.clone(),
        },
    );
    Ok([help, schema, docs]
        .into_iter()
        .map(|definition| definition.with_category(META_CATEGORY).with_tags(["meta", "bootstrap"]))
        .collect())
}

/// Resolves the owning registry.
fn upgrade(registry: &Weak<CommandRegistry>) -> Result<Arc<CommandRegistry>, HandlerError> {
    registry.upgrade().ok_or_else(|| HandlerError::new("command registry is no longer available"))
}

/// Input naming an optional single command.
#[derive(Debug, Default, Deserialize)]
struct CommandSelector {
    /// Command to select; all when absent.
    #[serde(default)]
    command: Option<String>,
}

/// Selects one descriptor or all of them.
fn select(
    registry: &CommandRegistry,
    selector: CommandSelector,
) -> Result<Vec<CommandDescriptor>, CommandError> {
    match selector.command {
        Some(name) => registry.get(&name).map(|definition| vec![definition.describe()]).ok_or_else(
            || CommandError::command_not_found(&name, &registry.suggest(&name)),
        ),
        None => Ok(registry.descriptors()),
    }
}

// ============================================================================
// SECTION: Help
// ============================================================================

/// Help output detail level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum HelpFormat {
    /// Names and descriptions.
    #[default]
    Brief,
    /// Adds tags, versions, and mutation flags.
    Full,
}

/// `meta.help` input.
#[derive(Debug, Default, Deserialize)]
struct HelpInput {
    /// Case-insensitive filter.
    #[serde(default)]
    filter: Option<String>,
    /// Detail level.
    #[serde(default)]
    format: HelpFormat,
}

/// One entry in the help listing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HelpEntry {
    /// Command name.
    name: String,
    /// Description.
    description: String,
    /// Mutation flag in full format.
    #[serde(skip_serializing_if = "Option::is_none")]
    mutation: Option<bool>,
    /// Tags in full format.
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<Vec<String>>,
    /// Version in full format.
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

/// Handler for `meta.help`.
struct HelpHandler {
    /// Owning registry.
    registry: Weak<CommandRegistry>,
}

#[async_trait]
impl CommandHandler for HelpHandler {
    async fn handle(
        &self,
        input: Value,
        _context: CommandContext,
    ) -> Result<CommandOutput, HandlerError> {
        let input: HelpInput = serde_json::from_value(input)?;
        let registry = upgrade(&self.registry)?;
        let filter = input.filter.as_deref().map(str::to_lowercase);
        let mut categories: BTreeMap<String, Vec<HelpEntry>> = BTreeMap::new();
        let mut total = 0_usize;
        for definition in registry.list() {
            if let Some(filter) = &filter
                && !matches_filter(definition, filter)
            {
                continue;
            }
            total += 1;
            let full = input.format == HelpFormat::Full;
            categories
                .entry(definition.category().unwrap_or(DEFAULT_CATEGORY).to_string())
                .or_default()
                .push(HelpEntry {
                    name: definition.name().to_string(),
                    description: definition.description().to_string(),
                    mutation: full.then(|| definition.is_mutation()),
                    tags: full.then(|| definition.tags().to_vec()),
                    version: if full { definition.version().map(str::to_string) } else { None },
                });
        }
        let reasoning = match &input.filter {
            Some(filter) => format!("{total} commands match '{filter}'"),
            None => format!("{total} commands available"),
        };
        let data = json!({
            "total": total,
            "filtered": input.filter.is_some(),
            "categories": categories,
        });
        Ok(CommandResult::success(data).with_reasoning(reasoning).into())
    }
}

/// Returns true when the filter matches the name, description, or a tag.
fn matches_filter(definition: &CommandDefinition, filter: &str) -> bool {
    definition.name().to_lowercase().contains(filter)
        || definition.description().to_lowercase().contains(filter)
        || definition.tags().iter().any(|tag| tag.to_lowercase().contains(filter))
}

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Handler for `meta.schema`.
struct SchemaHandler {
    /// Owning registry.
    registry: Weak<CommandRegistry>,
}

#[async_trait]
impl CommandHandler for SchemaHandler {
    async fn handle(
        &self,
        input: Value,
        _context: CommandContext,
    ) -> Result<CommandOutput, HandlerError> {
        let selector: CommandSelector = serde_json::from_value(input)?;
        let registry = upgrade(&self.registry)?;
        let result = select(&registry, selector).map(|descriptors| {
            let schemas: Vec<Value> = descriptors
                .into_iter()
                .map(|descriptor| {
                    json!({ "name": descriptor.name, "inputSchema": descriptor.input_schema })
                })
                .collect();
            json!({ "schemas": schemas })
        });
        Ok(CommandResult::from(result).into())
    }
}

// ============================================================================
// SECTION: Docs
// ============================================================================

/// Handler for `meta.docs`.
struct DocsHandler {
    /// Owning registry.
    registry: Weak<CommandRegistry>,
}

#[async_trait]
impl CommandHandler for DocsHandler {
    async fn handle(
        &self,
        input: Value,
        _context: CommandContext,
    ) -> Result<CommandOutput, HandlerError> {
        let selector: CommandSelector = serde_json::from_value(input)?;
        let registry = upgrade(&self.registry)?;
        let result = select(&registry, selector)
            .map(|descriptors| json!({ "markdown": render_markdown(&descriptors) }));
        Ok(CommandResult::from(result).into())
    }
}

/// Renders descriptors as markdown grouped by category.
fn render_markdown(descriptors: &[CommandDescriptor]) -> String {
    let mut grouped: BTreeMap<&str, Vec<&CommandDescriptor>> = BTreeMap::new();
    for descriptor in descriptors {
        grouped
            .entry(descriptor.category.as_deref().unwrap_or(DEFAULT_CATEGORY))
            .or_default()
            .push(descriptor);
    }
    let mut out = String::from("# Commands\n");
    for (category, entries) in grouped {
        let _ = write!(out, "\n## {category}\n");
        for descriptor in entries {
            let _ = write!(out, "\n### `{}`\n\n{}\n", descriptor.name, descriptor.description);
            if descriptor.mutation {
                out.push_str("\n_Mutation: this command has side effects._\n");
            }
            render_parameters(&mut out, &descriptor.input_schema);
        }
    }
    out
}

/// Appends a parameter table for an object schema.
fn render_parameters(out: &mut String, schema: &Value) {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };
    if properties.is_empty() {
        return;
    }
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    out.push_str("\n| Parameter | Type | Required | Description |\n|---|---|---|---|\n");
    for (name, property) in properties {
        let kind = property.get("type").and_then(Value::as_str).unwrap_or("any");
        let description = property.get("description").and_then(Value::as_str).unwrap_or("");
        let required = if required.contains(&name.as_str()) { "yes" } else { "no" };
        let _ = writeln!(out, "| `{name}` | {kind} | {required} | {description} |");
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions are permitted."
    )]

    use serde_json::json;

    use super::DOCS_COMMAND;
    use super::HELP_COMMAND;
    use super::SCHEMA_COMMAND;
    use crate::command::CommandDefinition;
    use crate::command::CommandOutput;
    use crate::command::handler_fn;
    use crate::context::CommandContext;
    use crate::context::TransportKind;
    use crate::registry::CommandRegistry;
    use crate::registry::RegistryError;
    use crate::result::CommandResult;
    use crate::schema::InputSchema;

    fn sample_registry() -> std::sync::Arc<CommandRegistry> {
        let mut registry = CommandRegistry::new();
        registry
            .register(
                CommandDefinition::new(
                    "todo.create",
                    "Create a todo item",
                    InputSchema::object(
                        json!({ "title": { "type": "string", "description": "Item title" } }),
                        &["title"],
                    )
                    .unwrap(),
                    handler_fn(|input, _ctx| async move {
                        Ok(CommandOutput::from(CommandResult::success(input)))
                    }),
                )
                .as_mutation()
                .with_category("todo"),
            )
            .unwrap();
        registry.into_shared().unwrap()
    }

    fn ctx() -> CommandContext {
        CommandContext::new("trace-bootstrap", TransportKind::InProcess)
    }

    #[tokio::test]
    async fn help_groups_by_category() {
        let registry = sample_registry();
        let result = registry.execute(HELP_COMMAND, json!({}), ctx()).await;
        let data = result.data().unwrap();
        assert_eq!(data["total"], json!(4));
        assert_eq!(data["categories"]["todo"][0]["name"], json!("todo.create"));
        assert_eq!(data["categories"]["meta"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn help_filter_narrows_listing() {
        let registry = sample_registry();
        let args = json!({ "filter": "TODO", "format": "full" });
        let result = registry.execute(HELP_COMMAND, args, ctx()).await;
        let data = result.data().unwrap();
        assert_eq!(data["total"], json!(1));
        assert_eq!(data["categories"]["todo"][0]["mutation"], json!(true));
    }

    #[tokio::test]
    async fn schema_for_unknown_command_suggests_names() {
        let registry = sample_registry();
        let args = json!({ "command": "todo.creat" });
        let result = registry.execute(SCHEMA_COMMAND, args, ctx()).await;
        let error = result.error().unwrap();
        assert_eq!(error.code, "COMMAND_NOT_FOUND");
        assert_eq!(error.details.as_ref().unwrap()["suggestions"], json!(["todo.create"]));
    }

    #[tokio::test]
    async fn docs_render_parameter_tables() {
        let registry = sample_registry();
        let args = json!({ "command": "todo.create" });
        let result = registry.execute(DOCS_COMMAND, args, ctx()).await;
        let markdown = result.data().unwrap()["markdown"].as_str().unwrap().to_string();
        assert!(markdown.contains("### `todo.create`"));
        assert!(markdown.contains("| `title` | string | yes | Item title |"));
        assert!(markdown.contains("side effects"));
    }

    #[test]
    fn reserved_names_cannot_be_registered() {
        let mut registry = CommandRegistry::new();
        let err = registry
            .register(CommandDefinition::new(
                HELP_COMMAND,
                "shadow",
                InputSchema::any_object().unwrap(),
                handler_fn(|input, _ctx| async move {
                    Ok(CommandOutput::from(CommandResult::success(input)))
                }),
            ))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateCommand(HELP_COMMAND.to_string()));
    }
}
