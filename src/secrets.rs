//! API key lookup.
//!
//! Keys are resolved in order: config file value, then environment
//! variable by exact name, then a caller-provided masked input channel.
//! Absence is never an error here - it propagates as an empty string,
//! and the chat loop treats empty as "not ready".

use std::collections::HashMap;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;

/// Where a resolved value came from. Values marked `Configured` must
/// not be re-displayed by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Configured,
    UserSupplied,
}

/// Prompt callback: given a display label, returns the user's input,
/// or `None` when the channel cannot (or will not) prompt.
pub type PromptFn = Box<dyn FnMut(&str) -> Option<String> + Send>;

pub struct SecretResolver {
    configured: HashMap<String, String>,
    prompt: PromptFn,
}

impl SecretResolver {
    /// Resolver with an interactive fallback channel.
    pub fn new(configured: HashMap<String, String>, prompt: PromptFn) -> Self {
        Self { configured, prompt }
    }

    /// Resolver whose fallback channel never prompts. Missing keys
    /// resolve to an empty string.
    pub fn non_interactive(configured: HashMap<String, String>) -> Self {
        Self {
            configured,
            prompt: Box::new(|_| None),
        }
    }

    /// Look up `key_name`, soliciting from the fallback channel when no
    /// pre-provisioned value exists.
    pub fn resolve(&mut self, key_name: &str, fallback_label: &str) -> (String, KeySource) {
        if let Some(value) = self.configured.get(key_name) {
            if !value.is_empty() {
                return (value.clone(), KeySource::Configured);
            }
        }
        if let Ok(value) = std::env::var(key_name) {
            if !value.is_empty() {
                return (value, KeySource::Configured);
            }
        }
        let value = (self.prompt)(fallback_label).unwrap_or_default();
        (value, KeySource::UserSupplied)
    }
}

/// Read a line from the terminal with masked echo.
///
/// Returns `None` on Esc or Ctrl-C. Used as the interactive prompt
/// channel by the line-mode UI; the TUI supplies its own input mode.
pub fn masked_prompt(label: &str) -> Option<String> {
    use std::io::Write;

    print!("{} (input hidden): ", label);
    let _ = std::io::stdout().flush();

    if terminal::enable_raw_mode().is_err() {
        return None;
    }
    let mut value = String::new();
    let result = loop {
        match event::read() {
            Ok(Event::Key(key)) if key.kind != KeyEventKind::Release => match key.code {
                KeyCode::Enter => break Some(value),
                KeyCode::Esc => break None,
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break None,
                KeyCode::Backspace => {
                    if value.pop().is_some() {
                        print!("\u{8} \u{8}");
                        let _ = std::io::stdout().flush();
                    }
                }
                KeyCode::Char(c) => {
                    value.push(c);
                    print!("*");
                    let _ = std::io::stdout().flush();
                }
                _ => {}
            },
            Ok(_) => {}
            Err(_) => break None,
        }
    };
    let _ = terminal::disable_raw_mode();
    println!();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_value_wins() {
        let mut configured = HashMap::new();
        configured.insert("POLYCHAT_TEST_KEY_A".to_string(), "from-config".to_string());
        let mut resolver = SecretResolver::non_interactive(configured);
        let (value, source) = resolver.resolve("POLYCHAT_TEST_KEY_A", "Test key");
        assert_eq!(value, "from-config");
        assert_eq!(source, KeySource::Configured);
    }

    #[test]
    fn test_env_value_marked_configured() {
        std::env::set_var("POLYCHAT_TEST_KEY_B", "from-env");
        let mut resolver = SecretResolver::non_interactive(HashMap::new());
        let (value, source) = resolver.resolve("POLYCHAT_TEST_KEY_B", "Test key");
        assert_eq!(value, "from-env");
        assert_eq!(source, KeySource::Configured);
        std::env::remove_var("POLYCHAT_TEST_KEY_B");
    }

    #[test]
    fn test_prompt_fallback_is_user_supplied() {
        let mut resolver = SecretResolver::new(
            HashMap::new(),
            Box::new(|label: &str| {
                assert_eq!(label, "Test key");
                Some("typed".to_string())
            }),
        );
        let (value, source) = resolver.resolve("POLYCHAT_TEST_KEY_C", "Test key");
        assert_eq!(value, "typed");
        assert_eq!(source, KeySource::UserSupplied);
    }

    #[test]
    fn test_absence_is_empty_string_not_error() {
        let mut resolver = SecretResolver::non_interactive(HashMap::new());
        let (value, source) = resolver.resolve("POLYCHAT_TEST_KEY_D", "Test key");
        assert_eq!(value, "");
        assert_eq!(source, KeySource::UserSupplied);
    }

    #[test]
    fn test_empty_configured_value_falls_through() {
        let mut configured = HashMap::new();
        configured.insert("POLYCHAT_TEST_KEY_E".to_string(), String::new());
        let mut resolver =
            SecretResolver::new(configured, Box::new(|_| Some("prompted".to_string())));
        let (value, source) = resolver.resolve("POLYCHAT_TEST_KEY_E", "Test key");
        assert_eq!(value, "prompted");
        assert_eq!(source, KeySource::UserSupplied);
    }
}
