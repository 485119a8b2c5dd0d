//! OpenAI-compatible `/chat/completions` client
//!
//! Works against OpenAI itself and local servers such as Ollama or
//! llama.cpp. Streaming responses are server-sent events decoded on a
//! spawned task that forwards deltas over a channel.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::endpoint::{self, Endpoint};
use super::{ChatCompletion, ChatMessage, CompletionRequest, TokenStream};
use crate::{Error, Result};

/// Chat completion client for an OpenAI-compatible server
#[derive(Clone)]
pub struct OpenAiChat {
    endpoint: Endpoint,
}

impl OpenAiChat {
    /// Create a client
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is empty
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(base_url, api_key, "LLM")?,
        })
    }

    /// Model ids the server offers, sorted
    ///
    /// # Errors
    ///
    /// Returns error if the server is unreachable or the list is malformed
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = endpoint::send(self.endpoint.get("models"), Error::Llm).await?;
        let list: ModelList = response
            .json()
            .await
            .map_err(|e| Error::Llm(format!("failed to parse model list: {e}")))?;

        let mut ids: Vec<String> = list.data.into_iter().map(|m| m.id).collect();
        ids.sort();
        Ok(ids)
    }

    /// Confirm the server answers before the first turn needs it
    ///
    /// A missing `model` is only logged; the server may still load it on
    /// demand.
    ///
    /// # Errors
    ///
    /// Returns `Error::Llm` if the server cannot be reached
    pub async fn check_connection(&self, model: &str) -> Result<Vec<String>> {
        let models = self.list_models().await.map_err(|e| {
            let reason = match e {
                Error::Llm(reason) => reason,
                other => other.to_string(),
            };
            Error::Llm(format!(
                "cannot reach the LLM server at {}: {reason}",
                self.endpoint.base_url()
            ))
        })?;

        if models.iter().any(|m| m == model) {
            tracing::info!(%model, available = models.len(), "connected to LLM server");
        } else {
            tracing::warn!(%model, available = ?models, "configured model is not listed by the server");
        }
        Ok(models)
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::Response> {
        let body = WireRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        };

        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            stream,
            "chat completion request"
        );

        endpoint::send(self.endpoint.post("chat/completions").json(&body), Error::Llm).await
    }
}

#[async_trait]
impl ChatCompletion for OpenAiChat {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let response = self.send(request, false).await?;

        let result: WireResponse = response
            .json()
            .await
            .map_err(|e| Error::Llm(format!("failed to parse response: {e}")))?;

        Ok(result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<TokenStream> {
        let response = self.send(request, true).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(Err(Error::Llm(format!("stream error: {e}"))));
                        return;
                    }
                };

                for event in decoder.feed(&chunk) {
                    match event {
                        SseEvent::Delta(text) => {
                            if tx.send(Ok(text)).is_err() {
                                // Receiver dropped; stop reading
                                return;
                            }
                        }
                        SseEvent::Error(message) => {
                            let _ = tx.send(Err(Error::Llm(message)));
                            return;
                        }
                        SseEvent::Done => return,
                    }
                }
            }
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

/// Decoded server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Non-empty content delta
    Delta(String),
    /// Error object reported mid-stream
    Error(String),
    /// `[DONE]` sentinel
    Done,
}

/// Incremental decoder for `data:` lines of a chat completion stream
///
/// Bytes are buffered until a full line arrives so multi-byte characters
/// split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed raw bytes, returning every event completed by them
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();

            if data == "[DONE]" {
                events.push(SseEvent::Done);
                continue;
            }

            match serde_json::from_str::<StreamChunk>(data) {
                Ok(StreamChunk {
                    error: Some(error), ..
                }) => events.push(SseEvent::Error(error.message())),
                Ok(parsed) => {
                    let text: String = parsed
                        .choices
                        .into_iter()
                        .filter_map(|c| c.delta.content)
                        .collect();
                    if !text.is_empty() {
                        events.push(SseEvent::Delta(text));
                    }
                }
                Err(e) => tracing::debug!(error = %e, "skipping unparsable SSE line"),
            }
        }

        events
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    content: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StreamError {
    Object { message: String },
    Text(String),
}

impl StreamError {
    fn message(self) -> String {
        match self {
            Self::Object { message } | Self::Text(message) => message,
        }
    }
}
