//! Command-line argument surface.

use clap::Parser;

/// Multi-provider streaming LLM chat for the terminal.
#[derive(Debug, Parser)]
#[command(name = "polychat", version, about)]
pub struct Args {
    /// Backend to talk to: gemini, deepseek, dashscope, or volc.
    #[arg(long)]
    pub provider: Option<String>,

    /// Model identifier (or ep-* endpoint ID for volc).
    #[arg(long)]
    pub model: Option<String>,

    /// Endpoint ID for the Ark backend.
    #[arg(long)]
    pub endpoint_id: Option<String>,

    /// Start with deep-think mode on.
    #[arg(long)]
    pub deep_think: bool,

    /// UI to run: "tui" (default) or "terminal".
    #[arg(long)]
    pub ui: Option<String>,
}

impl Args {
    /// Overlay CLI choices onto the loaded configuration.
    pub fn apply(&self, config: &mut crate::config::AppConfig) {
        if let Some(provider) = &self.provider {
            config.chat.provider = provider.clone();
        }
        if let Some(model) = &self.model {
            config.chat.model = model.clone();
        }
        if let Some(endpoint_id) = &self.endpoint_id {
            config.chat.endpoint_id = endpoint_id.clone();
        }
        if self.deep_think {
            config.chat.deep_think = true;
        }
        if let Some(ui) = &self.ui {
            config.ui.mode = ui.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_apply_overlays_only_given_values() {
        let args = Args::parse_from(["polychat", "--provider", "deepseek", "--deep-think"]);
        let mut config = AppConfig::default();
        args.apply(&mut config);
        assert_eq!(config.chat.provider, "deepseek");
        assert!(config.chat.deep_think);
        // Untouched fields keep their defaults.
        assert!(config.chat.model.is_empty());
        assert_eq!(config.ui.mode, "tui");
    }
}
