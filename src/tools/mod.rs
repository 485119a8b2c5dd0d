//! Tool registry
//!
//! Tools are registered once at startup into an immutable [`ToolRegistry`]
//! that is shared by the planner and the executor.

pub mod builtin;
pub mod executor;
mod web;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

pub use builtin::{THEMES, UiAction, UiControl, default_registry, register_builtins};
pub use executor::{ExecutedCall, ExecutionReport, ToolExecutor, preview};
pub use web::{SearchProvider, SearchResult, WebSearchTool, format_results};

use crate::Result;

/// Tool arguments: a JSON object
pub type ToolArgs = Map<String, Value>;

/// Name of the self-control tool handled by the pattern stage
pub const SELF_CONTROL: &str = "self_control";

/// Whether a tool changes external state or returns data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Mutates external state; acknowledged rather than reasoned over
    Action,
    /// Returns data the final response should use
    Informational,
}

/// Result of a tool handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutput {
    Text(String),
    /// Raw image, described by the vision model before injection
    Image { data: Vec<u8>, mime_type: String },
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Executes one tool call
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with its arguments
    ///
    /// # Errors
    ///
    /// Returns error if the tool fails; the executor turns it into text
    async fn call(&self, args: &ToolArgs) -> Result<ToolOutput>;
}

/// Adapter for synchronous closures
struct FnHandler<F>(F);

#[async_trait]
impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(&ToolArgs) -> Result<String> + Send + Sync,
{
    async fn call(&self, args: &ToolArgs) -> Result<ToolOutput> {
        (self.0)(args).map(ToolOutput::Text)
    }
}

/// A registered capability
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    parameters: Value,
    kind: ToolKind,
    multi_instance: bool,
    captures_screen: bool,
    usage_rule: Option<String>,
    handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("multi_instance", &self.multi_instance)
            .finish_non_exhaustive()
    }
}

impl Tool {
    /// Create an informational tool with no parameters
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({"type": "object", "properties": {}, "required": []}),
            kind: ToolKind::Informational,
            multi_instance: false,
            captures_screen: false,
            usage_rule: None,
            handler: Arc::new(handler),
        }
    }

    /// Create a tool from a synchronous closure
    pub fn from_fn<F>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ToolArgs) -> Result<String> + Send + Sync + 'static,
    {
        Self::new(name, description, FnHandler(f))
    }

    /// Set the JSON schema of the arguments
    #[must_use]
    pub fn parameters(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }

    /// Mark as an action tool
    #[must_use]
    pub const fn action(mut self) -> Self {
        self.kind = ToolKind::Action;
        self
    }

    /// Allow several calls in one utterance
    #[must_use]
    pub const fn multi_instance(mut self) -> Self {
        self.multi_instance = true;
        self
    }

    /// Hide the assistant window while the handler runs
    #[must_use]
    pub const fn captures_screen(mut self) -> Self {
        self.captures_screen = true;
        self
    }

    /// Routing rule shown to the classifier
    #[must_use]
    pub fn usage_rule(mut self, rule: impl Into<String>) -> Self {
        self.usage_rule = Some(rule.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub const fn schema(&self) -> &Value {
        &self.parameters
    }

    #[must_use]
    pub const fn kind(&self) -> ToolKind {
        self.kind
    }

    #[must_use]
    pub const fn is_multi_instance(&self) -> bool {
        self.multi_instance
    }

    #[must_use]
    pub const fn is_screen_capture(&self) -> bool {
        self.captures_screen
    }

    /// Rule line for the classifier catalog, falling back to the description
    #[must_use]
    pub fn rule(&self) -> &str {
        self.usage_rule.as_deref().unwrap_or(&self.description)
    }

    /// Names of the schema's properties
    #[must_use]
    pub fn property_names(&self) -> Vec<String> {
        self.parameters
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether the tool takes any arguments
    #[must_use]
    pub fn has_parameters(&self) -> bool {
        !self.property_names().is_empty()
    }

    /// Run the handler
    ///
    /// # Errors
    ///
    /// Returns whatever the handler returns
    pub async fn call(&self, args: &ToolArgs) -> Result<ToolOutput> {
        self.handler.call(args).await
    }
}

/// A tool invocation chosen by the planner
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedCall {
    pub tool_name: String,
    pub arguments: ToolArgs,
}

impl PlannedCall {
    #[must_use]
    pub fn new(tool_name: impl Into<String>, arguments: ToolArgs) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
        }
    }

    /// A call with no arguments
    #[must_use]
    pub fn bare(tool_name: impl Into<String>) -> Self {
        Self::new(tool_name, ToolArgs::new())
    }
}

/// Immutable set of tools, in registration order
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    #[must_use]
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tool> {
        self.tools.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Collects tools before freezing them into a registry
#[derive(Debug, Default)]
pub struct ToolRegistryBuilder {
    tools: Vec<Tool>,
}

impl ToolRegistryBuilder {
    /// Add a tool, replacing any earlier tool of the same name
    #[must_use]
    pub fn register(mut self, tool: Tool) -> Self {
        if let Some(existing) = self.tools.iter_mut().find(|t| t.name == tool.name) {
            tracing::warn!(tool = %tool.name, "tool registered twice, replacing");
            *existing = tool;
        } else {
            self.tools.push(tool);
        }
        self
    }

    #[must_use]
    pub fn build(self) -> ToolRegistry {
        let index = self
            .tools
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();
        tracing::debug!(tools = self.tools.len(), "tool registry built");
        ToolRegistry {
            tools: self.tools,
            index,
        }
    }
}

/// Read a string argument
#[must_use]
pub fn str_arg<'a>(args: &'a ToolArgs, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Read a required string argument
///
/// # Errors
///
/// Returns error if the argument is missing or not a string
pub fn required_str<'a>(args: &'a ToolArgs, key: &str) -> Result<&'a str> {
    str_arg(args, key).ok_or_else(|| crate::Error::Tool(format!("missing argument: {key}")))
}
