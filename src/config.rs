//! Configuration management for polychat.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::providers::ProviderKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub chat: ChatConfig,
    /// Pre-provisioned API keys, keyed by the exact secret name
    /// (e.g. `GOOGLE_API_KEY`). Environment variables of the same
    /// names are consulted as well; see `secrets`.
    #[serde(default)]
    pub keys: HashMap<String, String>,
    #[serde(default)]
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub provider: String,
    /// Empty means the provider's default model (or, for Gemini, the
    /// deep-think preset).
    #[serde(default)]
    pub model: String,
    /// Endpoint ID for providers addressed by one (`ep-*`).
    #[serde(default)]
    pub endpoint_id: String,
    #[serde(default)]
    pub deep_think: bool,
    pub system_prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    /// "tui" or "terminal".
    #[serde(default = "default_ui_mode")]
    pub mode: String,
}

fn default_ui_mode() -> String {
    "tui".to_string()
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            mode: default_ui_mode(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            chat: ChatConfig {
                provider: ProviderKind::Gemini.config_name().to_string(),
                model: String::new(),
                endpoint_id: String::new(),
                deep_think: false,
                system_prompt: "You are a concise, efficient assistant. Answer quickly and \
                    get straight to the point."
                    .to_string(),
            },
            keys: HashMap::new(),
            ui: UiConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".polychat").join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;
            toml::from_str(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            Self::default()
        };

        if let Ok(provider) = std::env::var("POLYCHAT_PROVIDER") {
            config.chat.provider = provider;
        }
        if let Ok(model) = std::env::var("POLYCHAT_MODEL") {
            config.chat.model = model;
        }
        if let Ok(endpoint_id) = std::env::var("DOUBAO_ENDPOINT_ID") {
            config.chat.endpoint_id = endpoint_id;
        }
        if let Ok(mode) = std::env::var("POLYCHAT_UI") {
            config.ui.mode = mode;
        }

        Ok(config)
    }

    pub fn save_default() -> Result<PathBuf> {
        let config_path = Self::config_path()?;
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let default = Self::default();
        let content = toml::to_string_pretty(&default).context("Failed to serialize config")?;
        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;
        Ok(config_path)
    }

    pub fn provider_kind(&self) -> ProviderKind {
        ProviderKind::parse(&self.chat.provider).unwrap_or(ProviderKind::Gemini)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_round_trips_through_toml() {
        let default = AppConfig::default();
        let text = toml::to_string_pretty(&default).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.chat.provider, "gemini");
        assert!(parsed.chat.model.is_empty());
        assert!(!parsed.chat.deep_think);
        assert_eq!(parsed.ui.mode, "tui");
    }

    #[test]
    fn test_minimal_config_fills_defaults() {
        let parsed: AppConfig = toml::from_str(
            "[chat]\nprovider = \"deepseek\"\nsystem_prompt = \"hi\"\n",
        )
        .unwrap();
        assert_eq!(parsed.provider_kind(), ProviderKind::DeepSeek);
        assert!(parsed.chat.endpoint_id.is_empty());
        assert!(parsed.keys.is_empty());
        assert_eq!(parsed.ui.mode, "tui");
    }

    #[test]
    fn test_unknown_provider_falls_back_to_gemini() {
        let mut config = AppConfig::default();
        config.chat.provider = "mystery".to_string();
        assert_eq!(config.provider_kind(), ProviderKind::Gemini);
    }
}
