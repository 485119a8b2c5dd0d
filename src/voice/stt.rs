//! Speech-to-text through an OpenAI-compatible server

use async_trait::async_trait;

use super::Transcriber;
use crate::llm::endpoint::{self, Endpoint};
use crate::{Error, Result};

#[derive(serde::Deserialize)]
struct TranscriptionReply {
    text: String,
}

/// Language sent with every request
const LANGUAGE: &str = "en";

/// Transcribes WAV uploads through `/audio/transcriptions`
pub struct WhisperTranscriber {
    endpoint: Endpoint,
    model: String,
}

impl WhisperTranscriber {
    /// # Errors
    ///
    /// Returns error if the base URL or model is empty
    pub fn new(base_url: &str, api_key: Option<String>, model: String) -> Result<Self> {
        if model.trim().is_empty() {
            return Err(Error::Config("transcription model is empty".to_string()));
        }

        Ok(Self {
            endpoint: Endpoint::new(base_url, api_key, "transcription")?,
            model,
        })
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, wav: &[u8]) -> Result<Option<String>> {
        tracing::debug!(audio_bytes = wav.len(), model = %self.model, "transcribing");

        let upload = reqwest::multipart::Part::bytes(wav.to_vec())
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| Error::Stt(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", upload)
            .text("model", self.model.clone())
            .text("language", LANGUAGE)
            .text("response_format", "json");

        let response = endpoint::send(
            self.endpoint.post("audio/transcriptions").multipart(form),
            Error::Stt,
        )
        .await?;
        let reply: TranscriptionReply = response
            .json()
            .await
            .map_err(|e| Error::Stt(format!("unreadable response: {e}")))?;

        Ok(normalize_transcript(&reply.text))
    }
}

/// Trim a transcript, mapping empty output to `None`
fn normalize_transcript(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    tracing::info!(transcript = %text, "transcription complete");
    Some(text.to_string())
}
