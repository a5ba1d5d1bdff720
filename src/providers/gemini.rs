//! Native multimodal (Gemini) adapter.
//!
//! Talks to the generateContent API, the one backend with a
//! non-OpenAI-shaped protocol:
//! - the system instruction is a top-level `systemInstruction` field
//! - history is paired role/content `contents`, with `assistant`
//!   mapped to the `model` role token
//! - images travel as base64 `inlineData` parts
//!
//! Image turns are sent single-shot with no prior history attached;
//! mixing multimodal and text-only turns in one history triggers
//! protocol errors upstream, so image turns are stateless by design.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::sse::{fragment_stream, Parsed};
use super::{FragmentStream, ProviderAdapter};
use crate::error::ChatError;
use crate::types::{ChatRequest, Role};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiAdapter {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

// --- API Request Types ---

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiTextPart>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

/// A part is either text or inline image data.
#[derive(Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text(GeminiTextPart),
    InlineData(GeminiInlineDataPart),
}

#[derive(Serialize)]
struct GeminiTextPart {
    text: String,
}

#[derive(Serialize)]
struct GeminiInlineDataPart {
    #[serde(rename = "inlineData")]
    inline_data: GeminiInlineData,
}

#[derive(Serialize)]
struct GeminiInlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

// --- Streaming Response Types ---

#[derive(Deserialize)]
struct StreamChunk {
    candidates: Option<Vec<StreamCandidate>>,
}

#[derive(Deserialize)]
struct StreamCandidate {
    content: Option<StreamContent>,
}

#[derive(Deserialize)]
struct StreamContent {
    parts: Option<Vec<StreamPart>>,
}

#[derive(Deserialize)]
struct StreamPart {
    text: Option<String>,
}

// --- Implementation ---

impl GeminiAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn build_api_request(&self, request: &ChatRequest) -> GeminiRequest {
        let mut contents = Vec::new();

        if let Some(image) = &request.image {
            // Single-shot multimodal turn: no history attached.
            contents.push(GeminiContent {
                role: "user".to_string(),
                parts: vec![
                    GeminiPart::Text(GeminiTextPart {
                        text: request.prompt.clone(),
                    }),
                    GeminiPart::InlineData(GeminiInlineDataPart {
                        inline_data: GeminiInlineData {
                            mime_type: "image/jpeg".to_string(),
                            data: STANDARD.encode(&image.jpeg),
                        },
                    }),
                ],
            });
        } else {
            for turn in &request.history {
                contents.push(GeminiContent {
                    role: match turn.role {
                        Role::User => "user".to_string(),
                        Role::Assistant => "model".to_string(),
                    },
                    parts: vec![GeminiPart::Text(GeminiTextPart {
                        text: turn.display_text.clone(),
                    })],
                });
            }
            contents.push(GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart::Text(GeminiTextPart {
                    text: request.prompt.clone(),
                })],
            });
        }

        let system_instruction = if request.system_instruction.is_empty() {
            None
        } else {
            Some(GeminiSystemInstruction {
                parts: vec![GeminiTextPart {
                    text: request.system_instruction.clone(),
                }],
            })
        };

        GeminiRequest {
            contents,
            system_instruction,
        }
    }

    fn stream_url(&self, model: &str) -> String {
        let model_path = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };
        format!(
            "{}/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, model_path, self.api_key
        )
    }
}

/// Extract the text fragments of one SSE payload. A chunk yields zero
/// or one fragment in practice; empty fragments are dropped here so
/// accumulation never sees them.
fn parse_stream_payload(payload: &str) -> Parsed {
    let chunk: StreamChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(_) => return Parsed::Skip,
    };

    let mut fragments = Vec::new();
    for candidate in chunk.candidates.unwrap_or_default() {
        let parts = candidate.content.and_then(|c| c.parts).unwrap_or_default();
        for part in parts {
            if let Some(text) = part.text {
                if !text.is_empty() {
                    fragments.push(text);
                }
            }
        }
    }
    if fragments.is_empty() {
        Parsed::Skip
    } else {
        Parsed::Fragments(fragments)
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn name(&self) -> &str {
        "Gemini"
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<FragmentStream, ChatError> {
        let api_request = self.build_api_request(request);
        let url = self.stream_url(&request.model);

        tracing::debug!(model = %request.model, contents = api_request.contents.len(), "opening Gemini stream");

        let response = self
            .client
            .post(&url)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ChatError::Request(format!("failed to reach Gemini API: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Request(format!(
                "Gemini API error ({}): {}",
                status, body
            )));
        }

        Ok(fragment_stream(response.bytes_stream(), parse_stream_payload))
    }
}
