//! Plain line-mode chat loop.
//!
//! Reads one line at a time, streams the reply inline, and exposes the
//! same slash commands as the TUI. Masked key entry goes through
//! [`crate::secrets::masked_prompt`].

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::io::AsyncBufReadExt;
use tokio::sync::{mpsc, watch};

use crate::attachment;
use crate::chat::{self, ChatEvent, ChatSession, TurnOutcome};
use crate::providers::ProviderKind;
use crate::secrets::{KeySource, SecretResolver};
use crate::ui::UiExitAction;

enum CommandResult {
    Continue,
    Quit,
}

pub struct TerminalUi {
    resolver: SecretResolver,
}

impl TerminalUi {
    pub fn new(resolver: SecretResolver) -> Self {
        Self { resolver }
    }

    pub async fn run(mut self, mut session: ChatSession) -> Result<UiExitAction> {
        println!(
            "polychat - session started {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M")
        );
        announce(&session);
        self.ensure_key(&mut session);
        println!("Type your message, or /help for commands. quit or exit to leave.");

        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        let mut pending_attachment: Option<PathBuf> = None;

        loop {
            print!("You > ");
            std::io::stdout().flush().ok();
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let input = line.trim().to_string();
            if input.is_empty() {
                continue;
            }
            if matches!(input.as_str(), "quit" | "exit") {
                break;
            }
            if let Some(rest) = input.strip_prefix('/') {
                match self.handle_command(rest, &mut session, &mut pending_attachment) {
                    CommandResult::Continue => continue,
                    CommandResult::Quit => break,
                }
            }

            session = self.send(session, input, pending_attachment.take()).await?;
        }
        println!("Goodbye!");
        Ok(UiExitAction::Quit)
    }

    /// Run one turn, printing fragments as they stream in.
    async fn send(
        &mut self,
        session: ChatSession,
        input: String,
        attachment_path: Option<PathBuf>,
    ) -> Result<ChatSession> {
        if let Some(path) = &attachment_path {
            println!("[attachment: {}]", path.display());
        }

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        // No mid-stream cancel in line mode; the sender just has to outlive the turn.
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let handle = chat::spawn_turn(session, input, attachment_path, events_tx, cancel_rx);

        let mut streaming_started = false;
        let mut outcome = None;
        while let Some(event) = events_rx.recv().await {
            match event {
                ChatEvent::Warning(warning) => println!("[warn] {}", warning),
                ChatEvent::Fragment { delta, .. } => {
                    if !streaming_started {
                        print!("Assistant > ");
                        streaming_started = true;
                    }
                    print!("{}", delta);
                    std::io::stdout().flush().ok();
                }
                ChatEvent::Finished(o) => {
                    outcome = Some(o);
                    break;
                }
            }
        }
        if streaming_started {
            println!();
        }

        let session = handle.await.context("chat turn task failed")?;
        match outcome {
            Some(TurnOutcome::Completed { text }) => {
                if text.is_empty() {
                    println!("[no response text]");
                }
                println!();
            }
            Some(TurnOutcome::Failed {
                error,
                partial,
                hint,
            }) => {
                if partial.is_some() {
                    println!("[reply interrupted; partial text kept in history]");
                }
                println!("[error] {}", error);
                if let Some(hint) = hint {
                    println!("[hint] {}", hint);
                }
            }
            Some(TurnOutcome::Cancelled { .. }) => println!("[cancelled]"),
            None => println!("[error] turn ended without an outcome"),
        }
        Ok(session)
    }

    fn handle_command(
        &mut self,
        command: &str,
        session: &mut ChatSession,
        pending_attachment: &mut Option<PathBuf>,
    ) -> CommandResult {
        let mut parts = command.splitn(2, ' ');
        let name = parts.next().unwrap_or("").to_lowercase();
        let arg = parts.next().map(str::trim).unwrap_or("");

        match name.as_str() {
            "help" => {
                println!("Commands:");
                println!("  /provider [name]   switch backend ({})", provider_list());
                println!("  /model [name]      pick a model for the current provider");
                println!("  /endpoint <id>     set the Ark endpoint ID (ep-*)");
                println!("  /key               enter an API key (hidden input)");
                println!("  /think             toggle deep-think mode");
                println!("  /attach <path>     attach a file to the next message");
                println!("  /detach            drop the pending attachment");
                println!("  /clear             reset the conversation");
                println!("  /quit              exit");
            }
            "clear" => {
                session.clear();
                println!("[conversation cleared]");
            }
            "provider" => {
                if arg.is_empty() {
                    println!("Providers: {}", provider_list());
                } else if let Some(kind) = ProviderKind::parse(arg) {
                    session.settings.provider = kind;
                    session.settings.model.clear();
                    announce(session);
                    self.ensure_key(session);
                } else {
                    println!("[error] unknown provider '{}'; try one of: {}", arg, provider_list());
                }
            }
            "model" => {
                let models = session.settings.provider.models();
                if arg.is_empty() {
                    if session.settings.provider.uses_endpoint_id() {
                        println!("{} takes an endpoint ID; use /endpoint", session.settings.provider);
                    } else {
                        println!("Models: {}", models.join(", "));
                    }
                } else {
                    session.settings.model = arg.to_string();
                    if !models.is_empty() && !models.contains(&arg) {
                        println!("[warn] '{}' is not in the known model list", arg);
                    }
                    announce(session);
                }
            }
            "endpoint" => {
                if arg.is_empty() {
                    println!("Usage: /endpoint <ep-...>");
                } else {
                    session.settings.endpoint_id = arg.to_string();
                    println!("[endpoint set to {}]", arg);
                }
            }
            "key" => {
                let label = format!("{} API key", session.settings.provider.display_name());
                match crate::secrets::masked_prompt(&label) {
                    Some(value) if !value.is_empty() => {
                        session.settings.set_user_key(value);
                        println!("[key set for this session]");
                    }
                    _ => println!("[key unchanged]"),
                }
            }
            "think" => {
                session.settings.deep_think = !session.settings.deep_think;
                println!(
                    "[deep-think {}]",
                    if session.settings.deep_think { "on" } else { "off" }
                );
            }
            "attach" => {
                if arg.is_empty() {
                    println!("Usage: /attach <path>");
                } else {
                    let path = PathBuf::from(arg);
                    if !path.is_file() {
                        println!("[error] no such file: {}", arg);
                    } else if !attachment::is_accepted(arg) {
                        println!(
                            "[error] unsupported file type; accepted: {}",
                            attachment::ACCEPTED_EXTENSIONS.join(", ")
                        );
                    } else {
                        println!("[will attach {} to the next message]", path.display());
                        *pending_attachment = Some(path);
                    }
                }
            }
            "detach" => {
                *pending_attachment = None;
                println!("[attachment dropped]");
            }
            "quit" | "exit" => return CommandResult::Quit,
            other => println!("[error] unknown command '/{}'; try /help", other),
        }
        CommandResult::Continue
    }

    fn ensure_key(&mut self, session: &mut ChatSession) {
        let env_name = session.settings.provider.key_env();
        let (value, source) = session.settings.ensure_key(&mut self.resolver);
        if value.is_empty() {
            println!("[no {} found; use /key to enter one]", env_name);
        } else if source == KeySource::Configured {
            println!("[using configured {}]", env_name);
        } else {
            println!("[key set for this session]");
        }
    }
}

fn announce(session: &ChatSession) {
    let settings = &session.settings;
    let model = settings.effective_model();
    println!(
        "Provider: {} | model: {} | deep-think: {}",
        settings.provider.display_name(),
        if model.is_empty() { "(unset)" } else { model.as_str() },
        if settings.deep_think { "on" } else { "off" }
    );
}

fn provider_list() -> String {
    ProviderKind::ALL
        .iter()
        .map(|k| k.config_name())
        .collect::<Vec<_>>()
        .join(", ")
}
