//! Conversation history owned by the turn task
//!
//! Index 0 is always the system prompt. When the history outgrows its
//! budget the oldest half is summarized by the classifier model into one
//! system message; if that fails the history is trimmed instead.

use crate::config::ConversationConfig;
use crate::db::FactRepo;
use crate::llm::{ChatCompletion, ChatMessage, CompletionRequest, Role};
use crate::planner::prompts;
use crate::{Error, Result};

/// Prefix of a summary message
pub const SUMMARY_HEADER: &str = "[Conversation summary]";

/// Compose the system prompt from configuration and stored facts
#[must_use]
pub fn system_prompt(config: &ConversationConfig, facts: &[String]) -> String {
    let mut prompt = config.system_prompt.replace("{name}", &config.assistant_name);

    if let Some(user) = &config.user_name {
        prompt.push_str(&format!("\n\nThe user's name is {user}."));
    }

    let facts = FactRepo::format_for_prompt(facts);
    if !facts.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(facts.trim_end());
    }

    prompt
}

/// Ordered conversation messages
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: Vec<ChatMessage>,
}

impl ConversationHistory {
    #[must_use]
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(system_prompt)],
        }
    }

    /// Append messages from a previous session after the system prompt
    pub fn seed(&mut self, previous: impl IntoIterator<Item = ChatMessage>) {
        self.messages
            .extend(previous.into_iter().filter(|m| m.role != Role::System));
    }

    /// Replace the system prompt at index 0
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.messages[0] = ChatMessage::system(prompt);
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Messages after the system prompt
    #[must_use]
    pub fn conversation(&self) -> &[ChatMessage] {
        &self.messages[1..]
    }

    #[must_use]
    pub fn has_transient(&self) -> bool {
        self.messages.iter().any(|m| m.transient)
    }

    /// Drop tool-context messages, returning how many were removed
    pub fn strip_transient(&mut self) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| !m.transient);
        before - self.messages.len()
    }

    /// Forget everything but the system prompt
    pub fn clear(&mut self) {
        self.messages.truncate(1);
    }

    /// Keep the system prompt and the last `max` messages
    pub fn trim_to(&mut self, max: usize) {
        let len = self.conversation().len();
        if len > max {
            self.messages.drain(1..=len - max);
        }
    }

    /// Bring the history within `max` messages
    ///
    /// With a summarizer the oldest half is folded into one summary message;
    /// without one, or if summarizing fails, the oldest messages are dropped.
    pub async fn compact(&mut self, max: usize, summarizer: Option<(&dyn ChatCompletion, &str)>) {
        let len = self.conversation().len();
        if len <= max {
            return;
        }

        if let Some((chat, model)) = summarizer {
            match self.summarize_oldest_half(chat, model).await {
                Ok(removed) => {
                    tracing::info!(removed, "history summarized");
                    // The summary alone may not be enough when max is tiny
                    self.trim_to(max);
                    return;
                }
                Err(e) => tracing::warn!(error = %e, "history summary failed, trimming"),
            }
        }

        self.trim_to(max);
        tracing::debug!(kept = self.conversation().len(), "history trimmed");
    }

    async fn summarize_oldest_half(&mut self, chat: &dyn ChatCompletion, model: &str) -> Result<usize> {
        let count = (self.conversation().len() / 2).max(1);
        let oldest = &self.messages[1..=count];

        let transcript = oldest
            .iter()
            .filter(|m| !m.transient)
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let request = CompletionRequest::classifier(model, prompts::summarize(&transcript))
            .with_temperature(0.3)
            .with_max_tokens(300);
        let summary = chat.complete(&request).await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(Error::Llm("empty summary".to_string()));
        }

        self.messages.splice(
            1..=count,
            [ChatMessage::system(format!("{SUMMARY_HEADER}\n{summary}"))],
        );
        Ok(count)
    }
}
