//! Intent planning
//!
//! An utterance passes through cascading stages, cheapest first:
//!
//! 1. pattern rules pick out self-control actions without a model call
//! 2. if the rules found nothing, a yes/no classifier catches other phrasings
//! 3. a multi-label router picks the remaining tools
//!
//! Vague references are resolved against recent history before arguments are
//! extracted. Tools that may run several times per utterance get one batched
//! extraction call; every other tool gets its own.

mod parse;
mod patterns;
pub(crate) mod prompts;

use std::sync::Arc;

use crate::Result;
use crate::llm::{ChatCompletion, ChatMessage, CompletionRequest};
use crate::tools::{ExecutionReport, PlannedCall, SELF_CONTROL, Tool, ToolArgs, ToolRegistry, UiAction};

pub use parse::{
    argument_list, argument_object, extract_json, has_vague_reference, is_yes, string_list,
    tool_list,
};
pub use patterns::{match_clause, match_self_control, split_clauses};

/// History messages shown to the reference resolver
const RESOLUTION_WINDOW: usize = 4;

/// Tool use carried from one turn to the next
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnContext {
    pub last_tools_used: Vec<String>,
    pub had_tool_call: bool,
}

impl TurnContext {
    /// Context after a turn with the given execution report
    #[must_use]
    pub fn after(report: &ExecutionReport) -> Self {
        let last_tools_used = report.tools_used();
        Self {
            had_tool_call: !last_tools_used.is_empty(),
            last_tools_used,
        }
    }
}

/// Turns an utterance into an ordered tool plan
pub struct IntentPlanner {
    chat: Arc<dyn ChatCompletion>,
    model: String,
    registry: Arc<ToolRegistry>,
}

impl IntentPlanner {
    #[must_use]
    pub fn new(chat: Arc<dyn ChatCompletion>, model: impl Into<String>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            chat,
            model: model.into(),
            registry,
        }
    }

    /// Plan the tool calls an utterance needs
    ///
    /// Classifier failures degrade to fewer calls; planning never fails the turn.
    pub async fn plan(
        &self,
        utterance: &str,
        history: &[ChatMessage],
        context: &TurnContext,
    ) -> Vec<PlannedCall> {
        let mut plan = self.plan_self_control(utterance).await;

        let tools = self.route(utterance, context).await;
        if tools.is_empty() {
            return plan;
        }

        let resolved = self.resolve_references(utterance, history).await;
        plan.extend(self.build_calls(&tools, &resolved).await);

        tracing::info!(
            calls = plan.len(),
            tools = %plan.iter().map(|c| c.tool_name.as_str()).collect::<Vec<_>>().join(","),
            "plan ready"
        );
        plan
    }

    /// Stages 0 and 1
    async fn plan_self_control(&self, utterance: &str) -> Vec<PlannedCall> {
        if !self.registry.contains(SELF_CONTROL) {
            return Vec::new();
        }

        let actions = match_self_control(utterance);
        if !actions.is_empty() {
            tracing::debug!(actions = actions.len(), "self-control matched by patterns");
            return actions.iter().map(to_call).collect();
        }

        match self.ask(prompts::self_control_gate(utterance)).await {
            Ok(reply) if is_yes(&reply) => {
                tracing::debug!("self-control confirmed by classifier");
                let Some(tool) = self.registry.get(SELF_CONTROL) else {
                    return Vec::new();
                };
                self.batched_arguments(tool, utterance, 1)
                    .await
                    .iter()
                    .filter_map(|args| UiAction::from_args(args).ok())
                    .map(|action| to_call(&action))
                    .collect()
            }
            Ok(_) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "self-control classifier failed");
                Vec::new()
            }
        }
    }

    /// Stage 2
    async fn route(&self, utterance: &str, context: &TurnContext) -> Vec<String> {
        let has_tools = self.registry.iter().any(|t| t.name() != SELF_CONTROL);
        if !has_tools {
            return Vec::new();
        }

        let previous: &[String] = if context.had_tool_call {
            &context.last_tools_used
        } else {
            &[]
        };

        match self.ask(prompts::router(utterance, &self.registry, previous)).await {
            Ok(reply) => {
                let tools = tool_list(&reply, &self.registry);
                tracing::debug!(reply = %reply.trim(), tools = ?tools, "router");
                tools
            }
            Err(e) => {
                tracing::warn!(error = %e, "router failed");
                Vec::new()
            }
        }
    }

    async fn resolve_references(&self, utterance: &str, history: &[ChatMessage]) -> String {
        let recent: Vec<ChatMessage> = history
            .iter()
            .filter(|m| !m.transient && m.role != crate::llm::Role::System)
            .cloned()
            .collect();

        if recent.is_empty() || !has_vague_reference(utterance) {
            return utterance.to_string();
        }

        let window = &recent[recent.len().saturating_sub(RESOLUTION_WINDOW)..];
        match self.ask(prompts::resolve_references(utterance, window)).await {
            Ok(reply) => {
                let rewritten = reply.trim().trim_matches('"').trim();
                // Reject empty or runaway rewrites
                if rewritten.is_empty() || rewritten.len() > utterance.len() * 4 + 40 {
                    utterance.to_string()
                } else {
                    tracing::debug!(from = utterance, to = rewritten, "references resolved");
                    rewritten.to_string()
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "reference resolution failed");
                utterance.to_string()
            }
        }
    }

    async fn build_calls(&self, tools: &[String], utterance: &str) -> Vec<PlannedCall> {
        let mut calls = Vec::new();
        let mut seen: Vec<&str> = Vec::new();

        for name in tools {
            if seen.contains(&name.as_str()) {
                continue;
            }
            seen.push(name.as_str());

            let Some(tool) = self.registry.get(name) else {
                continue;
            };

            if tool.is_multi_instance() {
                let expected = tools.iter().filter(|t| *t == name).count();
                let batch = self.batched_arguments(tool, utterance, expected).await;
                if batch.is_empty() {
                    tracing::warn!(tool = %name, "no arguments extracted, skipping");
                }
                calls.extend(batch.into_iter().map(|args| PlannedCall::new(name.clone(), args)));
            } else if tool.has_parameters() {
                let args = self.single_arguments(tool, utterance).await;
                calls.push(PlannedCall::new(name.clone(), args));
            } else {
                calls.push(PlannedCall::bare(name.clone()));
            }
        }

        calls
    }

    async fn single_arguments(&self, tool: &Tool, utterance: &str) -> ToolArgs {
        let extracted = match self.ask(prompts::single_arguments(tool, utterance)).await {
            Ok(reply) => argument_object(&reply),
            Err(e) => {
                tracing::warn!(tool = tool.name(), error = %e, "argument extraction failed");
                None
            }
        };

        extracted.unwrap_or_else(|| utterance_fallback(tool, utterance))
    }

    async fn batched_arguments(&self, tool: &Tool, utterance: &str, expected: usize) -> Vec<ToolArgs> {
        match self
            .ask(prompts::batched_arguments(tool, utterance, expected))
            .await
        {
            Ok(reply) => argument_list(&reply),
            Err(e) => {
                tracing::warn!(tool = tool.name(), error = %e, "batched extraction failed");
                Vec::new()
            }
        }
    }

    async fn ask(&self, prompt: String) -> Result<String> {
        let request = CompletionRequest::classifier(&self.model, prompt).with_max_tokens(256);
        self.chat.complete(&request).await
    }
}

fn to_call(action: &UiAction) -> PlannedCall {
    PlannedCall::new(SELF_CONTROL, action.to_args())
}

/// Arguments when extraction fails: the utterance fills a lone required string
fn utterance_fallback(tool: &Tool, utterance: &str) -> ToolArgs {
    let mut args = ToolArgs::new();
    let required: Vec<&str> = tool
        .schema()
        .get("required")
        .and_then(|r| r.as_array())
        .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    if let [only] = required.as_slice() {
        args.insert((*only).to_string(), serde_json::Value::from(utterance));
    }
    args
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::llm::TokenStream;
    use crate::{Error, Result};

    /// Replies chosen by the first matching prompt fragment
    struct Scripted {
        rules: Vec<(&'static str, &'static str)>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(rules: Vec<(&'static str, &'static str)>) -> Arc<Self> {
            Arc::new(Self {
                rules,
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn count(&self, fragment: &str) -> usize {
            self.prompts.lock().unwrap().iter().filter(|p| p.contains(fragment)).count()
        }
    }

    #[async_trait]
    impl ChatCompletion for Scripted {
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            let prompt = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.prompts.lock().unwrap().push(prompt.clone());
            self.rules
                .iter()
                .find(|(fragment, _)| prompt.contains(fragment))
                .map(|(_, reply)| (*reply).to_string())
                .ok_or_else(|| Error::Llm("unscripted prompt".to_string()))
        }

        async fn stream(&self, _request: &CompletionRequest) -> Result<TokenStream> {
            Err(Error::Llm("not streaming".to_string()))
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        Arc::new(
            ToolRegistry::builder()
                .register(
                    Tool::from_fn(SELF_CONTROL, "UI", |_| Ok(String::new()))
                        .parameters(json!({"type": "object", "properties": {"action": {"type": "string"}, "value": {"type": "string"}}, "required": ["action"]}))
                        .action()
                        .multi_instance(),
                )
                .register(
                    Tool::from_fn("calculate", "Math", |_| Ok(String::new())).parameters(
                        json!({"type": "object", "properties": {"expression": {"type": "string"}}, "required": ["expression"]}),
                    ),
                )
                .register(Tool::from_fn("get_current_time", "Clock", |_| Ok(String::new())))
                .register(
                    Tool::from_fn("get_weather", "Weather", |_| Ok(String::new())).parameters(
                        json!({"type": "object", "properties": {"location": {"type": "string"}}, "required": ["location"]}),
                    ),
                )
                .register(
                    Tool::from_fn("execute_shell", "Shell", |_| Ok(String::new()))
                        .parameters(json!({"type": "object", "properties": {"command": {"type": "string"}}, "required": ["command"]}))
                        .action()
                        .multi_instance(),
                )
                .build(),
        )
    }

    #[tokio::test]
    async fn pattern_stage_skips_gate() {
        let chat = Scripted::new(vec![("You are a router", "none")]);
        let planner = IntentPlanner::new(chat.clone(), "small", registry());

        let plan = planner
            .plan("hide the status bar and switch to midnight theme", &[], &TurnContext::default())
            .await;

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].arguments["action"], "hide_status_bar");
        assert_eq!(plan[1].arguments["value"], "midnight");
        assert_eq!(chat.count("change its own interface"), 0);
    }

    #[tokio::test]
    async fn gate_catches_missed_phrasing() {
        let chat = Scripted::new(vec![
            ("change its own interface", "yes"),
            ("possibly several times", r#"[{"action": "set_theme", "value": "ocean"}, {"action": "bogus"}]"#),
            ("You are a router", "none"),
        ]);
        let planner = IntentPlanner::new(chat, "small", registry());

        let plan = planner
            .plan("make everything look blue like the sea", &[], &TurnContext::default())
            .await;

        assert_eq!(plan, vec![PlannedCall::new(SELF_CONTROL, UiAction::SetTheme("ocean".to_string()).to_args())]);
    }

    #[tokio::test]
    async fn repeated_shell_calls_get_distinct_commands() {
        let chat = Scripted::new(vec![
            ("change its own interface", "no"),
            ("You are a router", "execute_shell, execute_shell"),
            (
                "Expected calls: about 2",
                r#"[{"command": "open -a Safari"}, {"command": "open -a Calculator"}]"#,
            ),
        ]);
        let planner = IntentPlanner::new(chat.clone(), "small", registry());

        let plan = planner
            .plan("open safari and open calculator", &[], &TurnContext::default())
            .await;

        assert_eq!(plan.len(), 2);
        assert!(plan.iter().all(|c| c.tool_name == "execute_shell"));
        assert_ne!(plan[0].arguments["command"], plan[1].arguments["command"]);
        assert_eq!(chat.count("possibly several times"), 1);
    }

    #[tokio::test]
    async fn single_tools_extract_or_fall_back() {
        let chat = Scripted::new(vec![
            ("change its own interface", "no"),
            ("You are a router", "calculate, get_current_time, get_weather"),
            ("tool `calculate`", r#"{"expression": "2 + 2"}"#),
            ("tool `get_weather`", "I am not sure"),
        ]);
        let planner = IntentPlanner::new(chat, "small", registry());

        let plan = planner
            .plan("what's two plus two, the time, and the weather in Oslo", &[], &TurnContext::default())
            .await;

        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].arguments["expression"], "2 + 2");
        assert_eq!(plan[1], PlannedCall::bare("get_current_time"));
        // Unparsable extraction puts the utterance in the lone required field
        assert_eq!(
            plan[2].arguments["location"],
            "what's two plus two, the time, and the weather in Oslo"
        );
    }

    #[tokio::test]
    async fn references_resolved_only_when_vague() {
        let chat = Scripted::new(vec![
            ("change its own interface", "no"),
            ("Rewrite the latest user message", "what's the weather in Tokyo tomorrow"),
            ("You are a router", "get_weather"),
            ("tool `get_weather`", r#"{"location": "Tokyo"}"#),
        ]);
        let planner = IntentPlanner::new(chat.clone(), "small", registry());
        let history = vec![
            ChatMessage::user("how's Tokyo"),
            ChatMessage::assistant("Tokyo is lovely."),
        ];

        let plan = planner
            .plan("what's the weather there", &history, &TurnContext::default())
            .await;
        assert_eq!(plan[0].arguments["location"], "Tokyo");
        assert_eq!(chat.count("Rewrite the latest user message"), 1);

        planner
            .plan("what's the weather in Paris", &history, &TurnContext::default())
            .await;
        assert_eq!(chat.count("Rewrite the latest user message"), 1);
    }

    #[tokio::test]
    async fn follow_up_hint_and_failures() {
        let chat = Scripted::new(vec![("change its own interface", "no")]);
        let planner = IntentPlanner::new(chat.clone(), "small", registry());
        let context = TurnContext {
            last_tools_used: vec!["get_weather".to_string()],
            had_tool_call: true,
        };

        // Router is unscripted, so it errors and the plan is empty
        assert!(planner.plan("and tomorrow?", &[], &context).await.is_empty());
        assert_eq!(chat.count("The previous turn already used: get_weather."), 1);
    }

    #[test]
    fn context_from_report() {
        assert_eq!(TurnContext::after(&ExecutionReport::default()), TurnContext::default());
    }
}
