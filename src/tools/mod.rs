//! Tool registry and built-in tools.
//!
//! A tool is a named capability with a JSON-Schema parameter contract.
//! `execute` is total: it returns a [`ToolOutcome`] and never panics or
//! raises past the registry. The registry validates arguments against the
//! compiled schema before dispatch and stamps results with the originating
//! call ID.

pub mod data_view;
pub mod fetch;
pub mod files;
pub mod patch_tools;
pub mod queue_tools;
pub mod retrieval;
pub mod schema;
pub mod shell;
pub mod subprocess;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::core::{ToolCall, ToolResult};
use crate::error::{Error, Result, ToolError};

/// What a tool execution produces: output text, or a structured error.
pub type ToolOutcome = std::result::Result<String, ToolError>;

/// A named capability with a schema-validated parameter contract.
pub trait Tool: Send + Sync {
    /// Registered tool name.
    fn name(&self) -> &'static str;

    /// One-line description shown in the tool catalogue.
    fn description(&self) -> &'static str;

    /// JSON Schema for the arguments. Root must be `type: "object"`.
    fn parameters(&self) -> Value;

    /// Executes the tool. Must be total: every internal failure maps to a
    /// [`ToolError`], never a panic.
    fn execute(&self, arguments: &Value) -> ToolOutcome;
}

/// Catalogue entry handed to the model gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// Parameter JSON Schema.
    pub parameters: Value,
}

/// The set of registered tools plus their compiled validators.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    validators: BTreeMap<String, jsonschema::Validator>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            validators: BTreeMap::new(),
        }
    }

    /// Registers a tool, compiling its parameter schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the schema root is not an object
    /// type or the schema does not compile.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let schema = tool.parameters();
        if schema.get("type").and_then(Value::as_str) != Some("object") {
            return Err(Error::Config {
                message: format!("tool '{}' schema root must be type \"object\"", tool.name()),
            });
        }
        let validator = jsonschema::validator_for(&schema).map_err(|e| Error::Config {
            message: format!("tool '{}' schema does not compile: {e}", tool.name()),
        })?;
        self.validators.insert(tool.name().to_string(), validator);
        self.tools.insert(tool.name().to_string(), tool);
        Ok(())
    }

    /// Registered tool names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Whether a tool is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Catalogue entries for the gateway, sorted by name.
    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .values()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// Dispatches one call: lookup, schema validation, execution. Total -
    /// every failure comes back as a failed [`ToolResult`].
    #[must_use]
    pub fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            let err = ToolError::missing(
                "TOOL_NOT_FOUND",
                format!("no such tool: {}", call.name),
            );
            return ToolResult::failure(&call.id, &err);
        };

        if let Some(validator) = self.validators.get(&call.name)
            && let Err(violation) = validator.validate(&call.arguments)
        {
            let err = ToolError::rules(
                "SCHEMA_VIOLATION",
                format!("arguments rejected for '{}': {violation}", call.name),
            );
            return ToolResult::failure(&call.id, &err);
        }

        match tool.execute(&call.arguments) {
            Ok(output) => ToolResult::success(&call.id, output),
            Err(err) => ToolResult::failure(&call.id, &err),
        }
    }
}

/// Deserializes validated arguments into a typed parameter struct.
///
/// Schema validation runs first in the registry, so a failure here means
/// the schema and the struct drifted apart; it still surfaces as a clean
/// `SCHEMA_VIOLATION`.
pub(crate) fn parse_args<T: DeserializeOwned>(
    arguments: &Value,
) -> std::result::Result<T, ToolError> {
    serde_json::from_value(arguments.clone())
        .map_err(|e| ToolError::rules("SCHEMA_VIOLATION", format!("invalid arguments: {e}")))
}
