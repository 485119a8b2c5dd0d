//! Image description through an OpenAI-compatible vision model

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::VisionModel;
use super::endpoint::{self, Endpoint};
use crate::{Error, Result};

/// Upper bound on a description, in tokens
const DESCRIPTION_TOKENS: u32 = 300;

const IMAGE_TYPES: [&str; 4] = ["image/png", "image/jpeg", "image/gif", "image/webp"];

/// Describes screenshots with a multimodal chat model
pub struct OpenAiVision {
    endpoint: Endpoint,
    model: String,
}

impl OpenAiVision {
    /// # Errors
    ///
    /// Returns error if the base URL is empty
    pub fn new(base_url: &str, api_key: Option<String>, model: String) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(base_url, api_key, "vision")?,
            model,
        })
    }
}

#[async_trait]
impl VisionModel for OpenAiVision {
    async fn describe(&self, image: &[u8], mime_type: &str, prompt: &str) -> Result<String> {
        if !IMAGE_TYPES.contains(&mime_type) {
            return Err(Error::Vision(format!("unsupported image type: {mime_type}")));
        }

        let data_url = format!(
            "data:{mime_type};base64,{}",
            base64::engine::general_purpose::STANDARD.encode(image)
        );
        let request = VisionRequest {
            model: &self.model,
            messages: [UserTurn {
                role: "user",
                content: [
                    ContentPart::Text { text: prompt },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ],
            }],
            max_tokens: DESCRIPTION_TOKENS,
        };

        tracing::debug!(model = %self.model, bytes = image.len(), "vision request");
        let response = endpoint::send(
            self.endpoint.post("chat/completions").json(&request),
            Error::Vision,
        )
        .await?;

        let reply: VisionResponse = response
            .json()
            .await
            .map_err(|e| Error::Vision(format!("unreadable response: {e}")))?;

        reply
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .ok_or_else(|| Error::Vision("model returned no description".to_string()))
    }
}

#[derive(Serialize)]
struct VisionRequest<'a> {
    model: &'a str,
    messages: [UserTurn<'a>; 1],
    max_tokens: u32,
}

#[derive(Serialize)]
struct UserTurn<'a> {
    role: &'a str,
    content: [ContentPart<'a>; 2],
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct VisionResponse {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_parts_are_tagged() {
        let part = ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: "data:image/png;base64,AAAA".to_string(),
            },
        };
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["type"], "image_url");
        assert_eq!(json["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[tokio::test]
    async fn rejects_unsupported_type_without_request() {
        let vision = OpenAiVision::new("http://127.0.0.1:9", None, "moondream".to_string()).unwrap();
        let err = vision.describe(b"RIFF", "audio/wav", "what is this").await;
        assert!(matches!(err, Err(Error::Vision(_))));
    }
}
