mod attachment;
mod chat;
mod cli;
mod config;
mod conversation;
mod error;
mod providers;
mod secrets;
mod types;
mod ui;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use chat::{ChatSession, SessionSettings};
use cli::Args;
use config::AppConfig;
use secrets::SecretResolver;
use ui::{terminal::TerminalUi, tui::TuiApp};

#[tokio::main]
async fn main() -> Result<()> {
    // Errors surface in the transcript; the log is for wire-level debugging.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // Auto-generate config file on first run
    let config_path = AppConfig::config_path()?;
    if !config_path.exists() {
        let path = AppConfig::save_default()?;
        println!("[config] created default config: {}", path.display());
    }

    let mut config = AppConfig::load()?;
    args.apply(&mut config);

    let session = ChatSession::new(SessionSettings::from_config(&config));
    let ui_mode = config.ui.mode.to_lowercase();

    match ui_mode.as_str() {
        "terminal" | "simple" | "cli" => {
            let resolver = SecretResolver::new(
                config.keys.clone(),
                Box::new(|label: &str| secrets::masked_prompt(label)),
            );
            TerminalUi::new(resolver).run(session).await?;
        }
        "tui" | "modern" => {
            // The TUI has its own masked key-entry mode, so its
            // resolver never prompts inline.
            let resolver = SecretResolver::non_interactive(config.keys.clone());
            TuiApp::new(resolver).run(session).await?;
        }
        other => {
            println!("[config] unknown UI '{}', using tui", other);
            let resolver = SecretResolver::non_interactive(config.keys.clone());
            TuiApp::new(resolver).run(session).await?;
        }
    }

    Ok(())
}
