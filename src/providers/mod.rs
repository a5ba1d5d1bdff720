//! Provider adapter module.
//!
//! This module defines the `ProviderAdapter` trait that abstracts over
//! the hosted LLM backends, and the `ProviderKind` enum that selects a
//! concrete implementation. Two adapter families exist: the native
//! multimodal Gemini API and the OpenAI-compatible endpoints, which
//! share one wire format and differ only in base URL, key, and model
//! identifier.

pub mod gemini;
pub mod openai_compatible;
pub mod sse;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::ChatError;
use crate::types::ChatRequest;

/// A pull-based, cancellable sequence of streamed text fragments.
///
/// Dropping the stream closes the underlying connection, which is how
/// the clear action cancels an in-flight turn.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

/// Trait both adapter families implement.
///
/// `open_stream` builds the provider-specific payload from the uniform
/// request and returns the fragment stream; request-build and HTTP
/// failures surface as [`ChatError::Request`], mid-stream failures as
/// [`ChatError::Stream`] items.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The provider's display name (for logging and error messages).
    fn name(&self) -> &str;

    /// Send the request and start streaming the reply.
    async fn open_stream(&self, request: &ChatRequest) -> Result<FragmentStream, ChatError>;
}

// --- Provider catalog ---

/// The selectable backends. Adding a provider means adding a variant
/// here and, if it speaks a new protocol, a new adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    DeepSeek,
    DashScope,
    Volc,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Gemini,
        ProviderKind::DeepSeek,
        ProviderKind::DashScope,
        ProviderKind::Volc,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "gemini" | "google" => Some(ProviderKind::Gemini),
            "deepseek" => Some(ProviderKind::DeepSeek),
            "dashscope" | "qwen" => Some(ProviderKind::DashScope),
            "volc" | "ark" | "doubao" => Some(ProviderKind::Volc),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "Gemini",
            ProviderKind::DeepSeek => "DeepSeek",
            ProviderKind::DashScope => "DashScope",
            ProviderKind::Volc => "Volcengine Ark",
        }
    }

    /// Canonical token used in the config file and on the CLI.
    pub fn config_name(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::DashScope => "dashscope",
            ProviderKind::Volc => "volc",
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn key_env(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "GOOGLE_API_KEY",
            ProviderKind::DeepSeek => "DEEPSEEK_API_KEY",
            ProviderKind::DashScope => "DASHSCOPE_API_KEY",
            ProviderKind::Volc => "VOLC_API_KEY",
        }
    }

    /// Base endpoint for the OpenAI-compatible family; the native
    /// provider uses its own default endpoint.
    pub fn base_url(&self) -> Option<&'static str> {
        match self {
            ProviderKind::Gemini => None,
            ProviderKind::DeepSeek => Some("https://api.deepseek.com"),
            ProviderKind::DashScope => Some("https://dashscope.aliyuncs.com/compatible-mode/v1"),
            ProviderKind::Volc => Some("https://ark.cn-beijing.volces.com/api/v3"),
        }
    }

    /// Fixed model list. Empty for providers addressed by endpoint ID.
    pub fn models(&self) -> &'static [&'static str] {
        match self {
            ProviderKind::Gemini => &[
                "models/gemini-1.5-flash",
                "models/gemini-1.5-pro",
                "models/gemini-3-pro-preview",
            ],
            ProviderKind::DeepSeek => &["deepseek-chat", "deepseek-coder"],
            ProviderKind::DashScope => &["qwen-plus", "qwen-max", "qwen-turbo", "qwen-vl-max"],
            ProviderKind::Volc => &[],
        }
    }

    pub fn default_model(&self) -> &'static str {
        self.models().first().copied().unwrap_or("")
    }

    /// Whether the model field is a free-form endpoint ID (`ep-*`)
    /// rather than a name picked from a list.
    pub fn uses_endpoint_id(&self) -> bool {
        matches!(self, ProviderKind::Volc)
    }

    /// Whether this backend accepts image input. Advisory only: an
    /// unsupported image still goes out, preceded by a warning.
    pub fn supports_image(&self) -> bool {
        !matches!(self, ProviderKind::DeepSeek)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Per-turn provider selection, built fresh from UI state each turn.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub base_url: Option<String>,
    pub api_key: String,
    /// Model identifier, or the endpoint ID for [`ProviderKind::Volc`].
    pub model: String,
    pub system_instruction: String,
    pub supports_image: bool,
}

/// Create the adapter for the selected provider.
pub fn create_adapter(config: &ProviderConfig) -> Box<dyn ProviderAdapter> {
    match config.kind {
        ProviderKind::Gemini => Box::new(gemini::GeminiAdapter::new(config.api_key.clone())),
        ProviderKind::DeepSeek | ProviderKind::DashScope | ProviderKind::Volc => {
            Box::new(openai_compatible::OpenAiCompatibleAdapter::new(
                config.kind.display_name(),
                config.api_key.clone(),
                config
                    .base_url
                    .clone()
                    .or_else(|| config.kind.base_url().map(str::to_string))
                    .unwrap_or_default(),
            ))
        }
    }
}

/// Advisory hint for known failure patterns. Text only, never control
/// flow; surfaced alongside the raw upstream error.
pub fn incompatibility_hint(
    kind: ProviderKind,
    model: &str,
    had_image: bool,
    error_text: &str,
) -> Option<String> {
    match kind {
        ProviderKind::Gemini if error_text.contains("404") && model.contains("flash") => {
            Some(
                "This account may not support the flash model; pick another model or \
                 enable deep-think mode."
                    .to_string(),
            )
        }
        ProviderKind::DeepSeek if had_image => {
            Some("DeepSeek models do not accept image input; retry without the attachment.".to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!(ProviderKind::parse("google"), Some(ProviderKind::Gemini));
        assert_eq!(ProviderKind::parse("Qwen"), Some(ProviderKind::DashScope));
        assert_eq!(ProviderKind::parse("doubao"), Some(ProviderKind::Volc));
        assert_eq!(ProviderKind::parse("mystery"), None);
    }

    #[test]
    fn test_catalog_shape() {
        assert!(ProviderKind::Gemini.base_url().is_none());
        assert_eq!(
            ProviderKind::DeepSeek.base_url(),
            Some("https://api.deepseek.com")
        );
        assert!(ProviderKind::Volc.uses_endpoint_id());
        assert_eq!(ProviderKind::Volc.default_model(), "");
        assert!(!ProviderKind::DeepSeek.supports_image());
        assert!(ProviderKind::DashScope.supports_image());
    }

    #[test]
    fn test_flash_404_hint() {
        let hint = incompatibility_hint(
            ProviderKind::Gemini,
            "models/gemini-1.5-flash",
            false,
            "Gemini API error (404): not found",
        );
        assert!(hint.is_some());

        let no_hint = incompatibility_hint(
            ProviderKind::Gemini,
            "models/gemini-1.5-pro",
            false,
            "Gemini API error (404): not found",
        );
        assert!(no_hint.is_none());
    }

    #[test]
    fn test_deepseek_image_hint() {
        let hint =
            incompatibility_hint(ProviderKind::DeepSeek, "deepseek-chat", true, "bad request");
        assert!(hint.is_some());
        let none = incompatibility_hint(ProviderKind::DeepSeek, "deepseek-chat", false, "x");
        assert!(none.is_none());
    }
}
