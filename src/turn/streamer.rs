//! Final response generation

use std::sync::Arc;

use futures::StreamExt;

use super::history::ConversationHistory;
use crate::Result;
use crate::display::DisplaySink;
use crate::llm::{ChatCompletion, CompletionRequest, Role};
use crate::voice::synthesis::SentenceFeed;

/// Said when the model produces nothing usable
pub const FALLBACK_RESPONSE: &str = "Sorry, I didn't quite get that. Could you try again?";

/// How the final response is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// One blocking call, shown once complete
    Buffered,
    /// Token deltas shown and segmented as they arrive
    Streamed,
}

/// Drives the final completion call
pub struct ResponseStreamer {
    chat: Arc<dyn ChatCompletion>,
    model: String,
    temperature: f32,
}

impl ResponseStreamer {
    #[must_use]
    pub fn new(chat: Arc<dyn ChatCompletion>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            chat,
            model: model.into(),
            temperature,
        }
    }

    fn request(&self, history: &ConversationHistory) -> CompletionRequest {
        CompletionRequest::new(&self.model, history.messages().to_vec())
            .with_temperature(self.temperature)
    }

    /// Generate the assistant's reply
    ///
    /// Streamed deltas go to the display and, when given, the sentence feed.
    /// When `tool_context` says this turn injected tool results, an empty
    /// reply triggers one buffered retry without them; otherwise, or on a
    /// second empty reply, the answer becomes [`FALLBACK_RESPONSE`]. Text
    /// produced by the retry or the fallback is shown and fed too.
    ///
    /// # Errors
    ///
    /// Returns error if the completion call itself fails
    pub async fn respond(
        &self,
        history: &mut ConversationHistory,
        mode: ResponseMode,
        tool_context: bool,
        display: &dyn DisplaySink,
        mut feed: Option<&mut SentenceFeed>,
    ) -> Result<String> {
        tracing::info!(model = %self.model, messages = history.messages().len(), ?mode, "llm call");

        let first = match mode {
            ResponseMode::Buffered => self.chat.complete(&self.request(history)).await?,
            ResponseMode::Streamed => self.stream(history, display, feed.as_deref_mut()).await?,
        };

        let streamed_ok = mode == ResponseMode::Streamed && !first.trim().is_empty();
        let mut text = first.trim().to_string();

        if text.is_empty() && tool_context {
            let stripped = history.strip_transient();
            tracing::warn!(stripped, "empty response after tool context, retrying without it");
            text = self.chat.complete(&self.request(history)).await?.trim().to_string();
        }

        if text.is_empty() {
            tracing::warn!("empty response, using fallback");
            text = FALLBACK_RESPONSE.to_string();
        }

        // Streamed text was already shown and fed
        if !streamed_ok {
            display.message(Role::Assistant, &text);
            if let Some(feed) = feed {
                feed.push(&text).await;
            }
        }

        tracing::info!(chars = text.len(), "response ready");
        Ok(text)
    }

    async fn stream(
        &self,
        history: &ConversationHistory,
        display: &dyn DisplaySink,
        mut feed: Option<&mut SentenceFeed>,
    ) -> Result<String> {
        let mut tokens = self.chat.stream(&self.request(history)).await?;
        let mut text = String::new();
        let mut started = false;

        while let Some(delta) = tokens.next().await {
            let delta = match delta {
                Ok(delta) => delta,
                Err(e) if !text.is_empty() => {
                    tracing::warn!(error = %e, "stream failed midway, keeping partial response");
                    break;
                }
                Err(e) => return Err(e),
            };
            if delta.is_empty() {
                continue;
            }

            // Leading whitespace-only deltas would open an empty bubble
            if !started {
                if delta.trim().is_empty() {
                    continue;
                }
                display.begin_stream();
                started = true;
            }

            display.token(&delta);
            if let Some(feed) = feed.as_deref_mut() {
                feed.push(&delta).await;
            }
            text.push_str(&delta);
        }

        if started {
            display.end_stream();
        }
        Ok(text)
    }
}
