//! Classifier prompts

use crate::llm::ChatMessage;
use crate::tools::{SELF_CONTROL, THEMES, Tool, ToolRegistry};

pub fn self_control_gate(utterance: &str) -> String {
    format!(
        "Does the user message below ask the assistant to change its own interface? \
         Interface changes are: switching the theme, showing or hiding the status bar, \
         showing, hiding or clearing the chat, muting or unmuting speech, and switching \
         between voice and chat mode.\n\n\
         User message: \"{utterance}\"\n\n\
         Reply with ONLY \"yes\" or \"no\"."
    )
}

pub fn router(utterance: &str, registry: &ToolRegistry, previous_tools: &[String]) -> String {
    let tools: Vec<&Tool> = registry.iter().filter(|t| t.name() != SELF_CONTROL).collect();
    let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
    let rules: Vec<String> = tools.iter().map(|t| format!("- {}", rule_line(t))).collect();

    let mut prompt = format!(
        "You are a router. Given the user message below, decide which tools are needed. \
         Available tools: {}\nRules:\n{}\n\
         - none: For everything else, including greetings, opinions, general knowledge, \
         and conversation about prior messages. When in doubt, pick none.\n",
        names.join(", "),
        rules.join("\n")
    );

    if !previous_tools.is_empty() {
        prompt.push_str(&format!(
            "The previous turn already used: {}. If this message is a follow-up about \
             that same data, pick none.\n",
            previous_tools.join(", ")
        ));
    }

    prompt.push_str(&format!(
        "If the message needs the same tool more than once (for example opening two apps), \
         repeat its name once per use.\n\n\
         User message: \"{utterance}\"\n\n\
         Reply with ONLY a comma-separated list of tool names, or \"none\". Nothing else."
    ));
    prompt
}

fn rule_line(tool: &Tool) -> String {
    let rule = tool.rule();
    // Rules are written as "name: ..."; bare descriptions get the name prefixed
    if rule.starts_with(&format!("{}:", tool.name())) {
        rule.to_string()
    } else {
        format!("{}: {rule}", tool.name())
    }
}

pub fn resolve_references(utterance: &str, recent: &[ChatMessage]) -> String {
    let transcript: Vec<String> = recent
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect();

    format!(
        "Rewrite the latest user message so it stands on its own, replacing vague references \
         like \"it\", \"that\" or \"the song\" with what they refer to in the conversation. \
         Keep everything else unchanged. If nothing needs replacing, repeat the message as is.\n\n\
         Conversation:\n{}\n\n\
         Latest message: \"{utterance}\"\n\n\
         Reply with ONLY the rewritten message.",
        transcript.join("\n")
    )
}

pub fn single_arguments(tool: &Tool, utterance: &str) -> String {
    format!(
        "Extract the arguments for the tool `{}` ({}) from the user message.\n\
         Parameters (JSON schema): {}\n\n\
         User message: \"{utterance}\"\n\n\
         Reply with ONLY a JSON object of arguments.",
        tool.name(),
        tool.description(),
        tool.schema()
    )
}

pub fn batched_arguments(tool: &Tool, utterance: &str, expected: usize) -> String {
    let mut prompt = format!(
        "The user message asks for the tool `{}` ({}), possibly several times.\n\
         Parameters of one call (JSON schema): {}\n",
        tool.name(),
        tool.description(),
        tool.schema()
    );

    if tool.name() == SELF_CONTROL {
        prompt.push_str(&format!("Valid themes: {}.\n", THEMES.join(", ")));
    }

    prompt.push_str(&format!(
        "Expected calls: about {expected}. List one argument object per distinct request, \
         in the order the user mentioned them.\n\n\
         User message: \"{utterance}\"\n\n\
         Reply with ONLY a JSON array of argument objects."
    ));
    prompt
}

pub fn fact_extraction(user: &str, assistant: &str) -> String {
    format!(
        "Extract durable facts about the user from this exchange: their name, preferences, \
         relationships, work, location, or anything they would expect you to remember next \
         time. Ignore small talk, questions, and anything about the assistant itself.\n\n\
         User: {user}\nAssistant: {assistant}\n\n\
         Reply with ONLY a JSON array of short fact strings, or [] if there are none."
    )
}

pub fn summarize(transcript: &str) -> String {
    format!(
        "Summarize the following conversation concisely, preserving key facts, decisions, \
         and user preferences. Keep it under 150 words.\n\n{transcript}"
    )
}
