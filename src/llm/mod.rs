//! Language model ports and message types
//!
//! The assistant talks to one OpenAI-compatible server for the main model,
//! the small classifier model, and the vision model. Each call names its
//! model in the [`CompletionRequest`].

pub mod endpoint;
mod openai;
mod vision;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

pub use endpoint::Endpoint;
pub use openai::{OpenAiChat, SseDecoder, SseEvent};
pub use vision::OpenAiVision;

use crate::Result;

/// Streamed text deltas
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Wire name of the role
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(crate::Error::Llm(format!("unknown role: {other}"))),
        }
    }
}

/// One entry of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Injected tool context: sent to the model for one turn, never persisted
    #[serde(skip)]
    pub transient: bool,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Tool results injected ahead of the final completion
    #[must_use]
    pub fn tool_context(content: impl Into<String>) -> Self {
        Self {
            transient: true,
            ..Self::user(content)
        }
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            transient: false,
        }
    }
}

/// A chat completion call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 0.7,
            max_tokens: None,
        }
    }

    /// Deterministic classifier call
    #[must_use]
    pub fn classifier(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(model, vec![ChatMessage::user(prompt)]).with_temperature(0.0)
    }

    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Chat completion backend
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Run a completion and return the full text
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response is malformed
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Run a completion and stream text deltas as they arrive
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be started; errors during the
    /// stream arrive as stream items
    async fn stream(&self, request: &CompletionRequest) -> Result<TokenStream>;
}

/// Describes images
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Describe an image in answer to `prompt`
    ///
    /// # Errors
    ///
    /// Returns error if the image type is unsupported or the call fails
    async fn describe(&self, image: &[u8], mime_type: &str, prompt: &str) -> Result<String>;
}
