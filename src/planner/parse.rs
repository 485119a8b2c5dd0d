//! Parsing classifier replies

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::tools::{SELF_CONTROL, ToolArgs, ToolRegistry};

static VAGUE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:it|its|that|this|those|these|them|they|there|he|she|him|her|the same|the song|the one|again)\b")
        .expect("valid regex")
});

/// Whether a yes/no reply is yes
#[must_use]
pub fn is_yes(reply: &str) -> bool {
    reply
        .trim()
        .trim_start_matches(['"', '\'', '*'])
        .to_lowercase()
        .starts_with("yes")
}

/// Tool names from a router reply, in order, duplicates kept
///
/// Unknown names and the self-control tool are dropped; "none" yields an
/// empty list.
#[must_use]
pub fn tool_list(reply: &str, registry: &ToolRegistry) -> Vec<String> {
    reply
        .split([',', '\n'])
        .map(|s| {
            s.trim()
                .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '.' | '*' | '-' | ' '))
                .to_lowercase()
        })
        .filter(|name| name != "none" && name != SELF_CONTROL && registry.contains(name))
        .collect()
}

/// Whether the utterance leans on earlier turns
#[must_use]
pub fn has_vague_reference(utterance: &str) -> bool {
    VAGUE_REFERENCE.is_match(utterance)
}

/// The first JSON value embedded in model output
///
/// Accepts bare JSON, fenced code blocks, and JSON surrounded by prose.
#[must_use]
pub fn extract_json(text: &str) -> Option<Value> {
    let text = text.trim();
    if let Ok(value) = serde_json::from_str(text) {
        return Some(value);
    }

    let starts = text.char_indices().filter(|(_, c)| matches!(c, '{' | '['));
    for (start, open) in starts {
        let close = if open == '{' { '}' } else { ']' };
        let Some(end) = text.rfind(close) else {
            continue;
        };
        if end <= start {
            continue;
        }
        if let Ok(value) = serde_json::from_str(&text[start..=end]) {
            return Some(value);
        }
    }
    None
}

/// A JSON object of arguments
#[must_use]
pub fn argument_object(text: &str) -> Option<ToolArgs> {
    match extract_json(text)? {
        Value::Object(map) => Some(map),
        // A lone object wrapped in an array
        Value::Array(items) if items.len() == 1 => match items.into_iter().next() {
            Some(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

/// A JSON array of argument objects
#[must_use]
pub fn argument_list(text: &str) -> Vec<ToolArgs> {
    match extract_json(text) {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        Some(Value::Object(map)) => vec![map],
        _ => Vec::new(),
    }
}

/// A JSON array of strings
#[must_use]
pub fn string_list(text: &str) -> Vec<String> {
    match extract_json(text) {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
