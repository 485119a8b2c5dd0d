//! Tool executor: runs a plan and folds the results into one context message

use std::sync::Arc;

use super::{PlannedCall, SELF_CONTROL, Tool, ToolKind, ToolOutput, ToolRegistry, UiControl};
use crate::llm::VisionModel;
use crate::{Error, Result};

/// Outcome of one planned call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedCall {
    pub tool_name: String,
    pub kind: ToolKind,
    /// Result text, or an inline error description
    pub output: String,
    pub succeeded: bool,
}

/// Results of a whole plan, in plan order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub calls: Vec<ExecutedCall>,
}

impl ExecutionReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Distinct tool names in first-use order
    #[must_use]
    pub fn tools_used(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for call in &self.calls {
            if !names.contains(&call.tool_name) {
                names.push(call.tool_name.clone());
            }
        }
        names
    }

    /// Whether a self-control action ran
    #[must_use]
    pub fn ran_self_control(&self) -> bool {
        self.calls.iter().any(|c| c.tool_name == SELF_CONTROL)
    }

    /// Build the message injected ahead of the final completion
    ///
    /// Actions are listed first, then informational data, each with an
    /// instruction on how to use it.
    #[must_use]
    pub fn context_message(&self) -> Option<String> {
        let actions: Vec<&ExecutedCall> = self
            .calls
            .iter()
            .filter(|c| c.kind == ToolKind::Action)
            .collect();
        let data: Vec<&ExecutedCall> = self
            .calls
            .iter()
            .filter(|c| c.kind == ToolKind::Informational)
            .collect();

        let mut sections = Vec::new();

        if !actions.is_empty() {
            let bullets: Vec<String> = actions.iter().map(|c| format!("- {}", c.output)).collect();
            sections.push(format!("[ACTIONS COMPLETED]\n{}", bullets.join("\n")));
        }

        if !data.is_empty() {
            let results: Vec<&str> = data.iter().map(|c| c.output.as_str()).collect();
            sections.push(format!("[DATA] {}", results.join("\n\n")));
        }

        let instruction = match (actions.is_empty(), data.is_empty()) {
            (true, true) => return None,
            (false, true) => "Briefly confirm what was done, naturally and in one sentence.",
            (true, false) => {
                "Using the data above, answer my previous question naturally and concisely."
            }
            (false, false) => {
                "First briefly acknowledge the completed actions, then answer my previous \
                 question using the data above, naturally and concisely."
            }
        };

        sections.push(instruction.to_string());
        Some(sections.join("\n\n"))
    }
}

/// Executes planned calls against the registry
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    vision: Option<Arc<dyn VisionModel>>,
    ui: Option<Arc<dyn UiControl>>,
}

impl ToolExecutor {
    #[must_use]
    pub const fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            vision: None,
            ui: None,
        }
    }

    /// Describe image results with a vision model
    #[must_use]
    pub fn with_vision(mut self, vision: Arc<dyn VisionModel>) -> Self {
        self.vision = Some(vision);
        self
    }

    /// Hide and show the assistant window around screen captures
    #[must_use]
    pub fn with_ui(mut self, ui: Arc<dyn UiControl>) -> Self {
        self.ui = Some(ui);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Run every call in plan order
    ///
    /// A failing call yields an error string in its slot; the rest still run.
    pub async fn execute(&self, plan: &[PlannedCall], utterance: &str) -> ExecutionReport {
        let mut calls = Vec::with_capacity(plan.len());

        for planned in plan {
            let Some(tool) = self.registry.get(&planned.tool_name) else {
                tracing::warn!(tool = %planned.tool_name, "planned tool not registered");
                calls.push(ExecutedCall {
                    tool_name: planned.tool_name.clone(),
                    kind: ToolKind::Informational,
                    output: format!("Error: Tool '{}' not found", planned.tool_name),
                    succeeded: false,
                });
                continue;
            };

            tracing::info!(tool = %planned.tool_name, args = %serde_json::Value::Object(planned.arguments.clone()), "executing tool");

            let (output, succeeded) = match self.run(tool, planned, utterance).await {
                Ok(text) => (text, true),
                Err(e) => {
                    tracing::warn!(tool = %planned.tool_name, error = %e, "tool failed");
                    (format!("Error executing {}: {e}", planned.tool_name), false)
                }
            };

            tracing::debug!(tool = %planned.tool_name, result = %preview(&output, 80), "tool result");

            calls.push(ExecutedCall {
                tool_name: planned.tool_name.clone(),
                kind: tool.kind(),
                output,
                succeeded,
            });
        }

        ExecutionReport { calls }
    }

    async fn run(&self, tool: &Tool, planned: &PlannedCall, utterance: &str) -> Result<String> {
        let output = if tool.is_screen_capture() {
            if let Some(ui) = &self.ui {
                ui.hide_window();
            }
            let result = tool.call(&planned.arguments).await;
            if let Some(ui) = &self.ui {
                ui.show_window();
            }
            result?
        } else {
            tool.call(&planned.arguments).await?
        };

        match output {
            ToolOutput::Text(text) => Ok(text),
            ToolOutput::Image { data, mime_type } => {
                let vision = self
                    .vision
                    .as_ref()
                    .ok_or_else(|| Error::Vision("no vision model configured".to_string()))?;
                let prompt = format!(
                    "The user asked: \"{utterance}\". Describe what is on this screen that \
                     helps answer the question. Include any visible text that matters."
                );
                let description = vision.describe(&data, &mime_type, &prompt).await?;
                Ok(format!("Screen description: {description}"))
            }
        }
    }
}

/// First `max` characters of `text`, with an ellipsis when cut
#[must_use]
pub fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{cut}...")
}
