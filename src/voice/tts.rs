//! Text-to-speech through an OpenAI-compatible server

use async_trait::async_trait;
use serde::Serialize;

use super::{AudioClip, SpeechSynthesizer, decode_mp3};
use crate::llm::endpoint::{self, Endpoint};
use crate::{Error, Result};

/// Accepted `speed` range of `/audio/speech`
const SPEED_RANGE: (f32, f32) = (0.25, 4.0);

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'static str,
}

/// Synthesizes MP3 speech through `/audio/speech`
pub struct OpenAiSpeech {
    endpoint: Endpoint,
    model: String,
    voice: String,
    speed: f32,
}

impl OpenAiSpeech {
    /// # Errors
    ///
    /// Returns error if the base URL or voice is empty
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: String,
        voice: String,
        speed: f32,
    ) -> Result<Self> {
        if voice.trim().is_empty() {
            return Err(Error::Config("TTS voice is empty".to_string()));
        }

        Ok(Self {
            endpoint: Endpoint::new(base_url, api_key, "speech")?,
            model,
            voice,
            speed: speed.clamp(SPEED_RANGE.0, SPEED_RANGE.1),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn synthesize(&self, text: &str) -> Result<AudioClip> {
        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "mp3",
        };
        let response =
            endpoint::send(self.endpoint.post("audio/speech").json(&request), Error::Tts).await?;
        let mp3 = response.bytes().await?.to_vec();
        tracing::debug!(chars = text.len(), bytes = mp3.len(), "speech synthesized");

        // Decoding is CPU-bound; keep it off the async workers
        tokio::task::spawn_blocking(move || decode_mp3(&mp3))
            .await
            .map_err(|e| Error::Tts(format!("decode task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_is_clamped() {
        let speech = |voice: &str, speed| {
            OpenAiSpeech::new("http://localhost:8880/v1", None, "tts-1".to_string(), voice.to_string(), speed)
        };

        assert!((speech("af_heart", 9.0).unwrap().speed - 4.0).abs() < f32::EPSILON);
        assert!(speech(" ", 1.0).is_err());
    }
}
