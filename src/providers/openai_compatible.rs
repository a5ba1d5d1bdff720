//! OpenAI-compatible adapter.
//!
//! Covers every backend sharing the chat-completions wire format
//! (DeepSeek, DashScope, Volcengine Ark); they differ only in base
//! endpoint, key, and model identifier - Ark takes a free-form
//! endpoint ID where the others take a model name.
//!
//! A system message always leads. Text-only turns append the full
//! prior conversation as alternating messages; image turns drop the
//! history and send one user message whose content is a multi-part
//! array with the image as a base64 JPEG data URL.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::sse::{fragment_stream, Parsed};
use super::{FragmentStream, ProviderAdapter};
use crate::error::ChatError;
use crate::types::{ChatRequest, Role};

pub struct OpenAiCompatibleAdapter {
    name: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

// --- API Request Types (OpenAI format) ---

#[derive(Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    stream: bool,
}

#[derive(Serialize)]
struct ApiMessage {
    role: String,
    content: ApiContent,
}

/// Content is a plain string for text turns and a part array when an
/// image rides along.
#[derive(Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

// --- Streaming Response Types ---

#[derive(Deserialize)]
struct StreamResponseChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

// --- Implementation ---

impl OpenAiCompatibleAdapter {
    pub fn new(name: impl Into<String>, api_key: String, base_url: String) -> Self {
        Self {
            name: name.into(),
            api_key,
            base_url,
            client: reqwest::Client::new(),
        }
    }

    fn build_api_request(&self, request: &ChatRequest) -> ApiRequest {
        let mut messages = vec![ApiMessage {
            role: "system".to_string(),
            content: ApiContent::Text(request.system_instruction.clone()),
        }];

        if let Some(image) = &request.image {
            // History is dropped for multimodal turns; one user message
            // with a text part and a data-URL image part.
            let data_url = format!("data:image/jpeg;base64,{}", STANDARD.encode(&image.jpeg));
            messages.push(ApiMessage {
                role: "user".to_string(),
                content: ApiContent::Parts(vec![
                    ContentPart::Text {
                        text: request.prompt.clone(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ]),
            });
        } else {
            for turn in &request.history {
                messages.push(ApiMessage {
                    role: match turn.role {
                        Role::User => "user".to_string(),
                        Role::Assistant => "assistant".to_string(),
                    },
                    content: ApiContent::Text(turn.display_text.clone()),
                });
            }
            messages.push(ApiMessage {
                role: "user".to_string(),
                content: ApiContent::Text(request.prompt.clone()),
            });
        }

        ApiRequest {
            model: request.model.clone(),
            messages,
            stream: true,
        }
    }
}

/// A chunk's first (only) choice may carry a content delta; an absent
/// or null delta means "no text this chunk", not an error.
fn parse_stream_payload(payload: &str) -> Parsed {
    if payload.trim() == "[DONE]" {
        return Parsed::Done;
    }
    let chunk: StreamResponseChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(_) => return Parsed::Skip,
    };
    match chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
    {
        Some(text) if !text.is_empty() => Parsed::Fragments(vec![text]),
        _ => Parsed::Skip,
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<FragmentStream, ChatError> {
        let api_request = self.build_api_request(request);
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        tracing::debug!(
            provider = %self.name,
            model = %request.model,
            messages = api_request.messages.len(),
            "opening chat-completions stream"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| {
                ChatError::Request(format!("failed to reach {} at {}: {}", self.name, url, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Request(format!(
                "{} API error ({}): {}",
                self.name, status, body
            )));
        }

        Ok(fragment_stream(response.bytes_stream(), parse_stream_payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EncodedImage, Turn};

    fn adapter() -> OpenAiCompatibleAdapter {
        OpenAiCompatibleAdapter::new("DeepSeek", "k".into(), "https://api.deepseek.com".into())
    }

    fn request_with(history: Vec<Turn>, image: Option<EncodedImage>) -> ChatRequest {
        ChatRequest {
            model: "deepseek-chat".to_string(),
            system_instruction: "Be concise.".to_string(),
            history,
            prompt: "describe".to_string(),
            image,
        }
    }

    #[test]
    fn test_system_message_always_leads() {
        let json = serde_json::to_value(adapter().build_api_request(&request_with(vec![], None)))
            .unwrap();
        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "Be concise.");
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_text_turn_appends_full_history_as_alternating_messages() {
        let history = vec![
            Turn::user("q1"),
            Turn::assistant("a1"),
            Turn::user("q2"),
            Turn::assistant("a2"),
        ];
        let json = serde_json::to_value(adapter().build_api_request(&request_with(history, None)))
            .unwrap();
        let messages = json["messages"].as_array().unwrap();
        // system + 4 history + new user message
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[5]["role"], "user");
        assert_eq!(messages[5]["content"], "describe");
    }

    #[test]
    fn test_image_turn_has_one_user_message_with_two_parts_and_no_history() {
        let history = vec![Turn::user("earlier"), Turn::assistant("reply")];
        let image = EncodedImage {
            jpeg: vec![0xff, 0xd8, 0xff],
            width: 1,
            height: 1,
        };
        let json = serde_json::to_value(
            adapter().build_api_request(&request_with(history, Some(image))),
        )
        .unwrap();
        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);

        let parts = messages[1]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[0]["text"], "describe");
        assert_eq!(parts[1]["type"], "image_url");
        let url = parts[1]["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_parse_payload_delta_and_done() {
        let payload = r#"{"choices":[{"delta":{"content":"Hel"}}]}"#;
        match parse_stream_payload(payload) {
            Parsed::Fragments(frags) => assert_eq!(frags, vec!["Hel"]),
            _ => panic!("expected fragments"),
        }
        assert!(matches!(parse_stream_payload("[DONE]"), Parsed::Done));
    }

    #[test]
    fn test_parse_payload_null_delta_is_not_an_error() {
        assert!(matches!(
            parse_stream_payload(r#"{"choices":[{"delta":{}}]}"#),
            Parsed::Skip
        ));
        assert!(matches!(
            parse_stream_payload(r#"{"choices":[{"delta":{"content":null}}]}"#),
            Parsed::Skip
        ));
        assert!(matches!(
            parse_stream_payload(r#"{"choices":[]}"#),
            Parsed::Skip
        ));
    }
}
