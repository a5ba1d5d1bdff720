//! Full-screen TUI using ratatui.
//!
//! The layout is status bar / transcript / input line. While a turn is
//! processing, the session is moved into a spawned task and handed
//! back when the task resolves; chat events are drained into the
//! transcript on every frame. Esc cancels an in-flight reply by
//! flipping the cancel channel, which makes the chat loop drop the
//! fragment stream and with it the connection.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Clear, Paragraph, Wrap},
    Frame,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::attachment;
use crate::chat::{self, ChatEvent, ChatSession, TurnOutcome};
use crate::providers::ProviderKind;
use crate::secrets::{KeySource, SecretResolver};
use crate::ui::{markdown, UiExitAction};

// ── Slash Command Definitions ───────────────────────────────

struct SlashCommand {
    name: &'static str,
    description: &'static str,
}

const SLASH_COMMANDS: &[SlashCommand] = &[
    SlashCommand {
        name: "/help",
        description: "Show available commands",
    },
    SlashCommand {
        name: "/clear",
        description: "Reset the conversation (cancels a streaming reply)",
    },
    SlashCommand {
        name: "/provider",
        description: "Switch backend (/provider <name>)",
    },
    SlashCommand {
        name: "/model",
        description: "Pick a model (/model <name>)",
    },
    SlashCommand {
        name: "/endpoint",
        description: "Set the Ark endpoint ID (/endpoint <ep-...>)",
    },
    SlashCommand {
        name: "/key",
        description: "Enter an API key (hidden input)",
    },
    SlashCommand {
        name: "/think",
        description: "Toggle deep-think mode",
    },
    SlashCommand {
        name: "/attach",
        description: "Attach a file to the next message (/attach <path>)",
    },
    SlashCommand {
        name: "/detach",
        description: "Drop the pending attachment",
    },
    SlashCommand {
        name: "/quit",
        description: "Exit the program",
    },
];

fn is_slash_command(input: &str) -> bool {
    let input = input.trim();
    match input.strip_prefix('/') {
        Some(rest) if !rest.is_empty() => {
            let cmd = rest.split_whitespace().next().unwrap_or("");
            !cmd.is_empty() && cmd.chars().all(|c| c.is_ascii_lowercase())
        }
        _ => false,
    }
}

/// Autocomplete popup state for slash commands.
struct SlashAutocomplete {
    visible: bool,
    selected: usize,
    filtered: Vec<usize>,
}

impl SlashAutocomplete {
    fn new() -> Self {
        Self {
            visible: false,
            selected: 0,
            filtered: Vec::new(),
        }
    }

    fn update_filter(&mut self, input: &str) {
        if input.contains(' ') || (!is_slash_command(input) && input != "/") {
            self.dismiss();
            return;
        }
        let query = input.to_lowercase();
        self.filtered = SLASH_COMMANDS
            .iter()
            .enumerate()
            .filter(|(_, cmd)| cmd.name.starts_with(&query))
            .map(|(i, _)| i)
            .collect();
        self.visible = !self.filtered.is_empty();
        if self.selected >= self.filtered.len() {
            self.selected = self.filtered.len().saturating_sub(1);
        }
    }

    fn move_up(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
        } else {
            self.selected = self.filtered.len().saturating_sub(1);
        }
    }

    fn move_down(&mut self) {
        if self.selected + 1 < self.filtered.len() {
            self.selected += 1;
        } else {
            self.selected = 0;
        }
    }

    fn selected_command(&self) -> Option<&'static str> {
        self.filtered
            .get(self.selected)
            .map(|&i| SLASH_COMMANDS[i].name)
    }

    fn dismiss(&mut self) {
        self.visible = false;
        self.filtered.clear();
        self.selected = 0;
    }
}

struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        ratatui::restore();
    }
}

// ── Input modes ─────────────────────────────────────────────

enum InputMode {
    Compose,
    /// Masked key entry for the current provider.
    KeyEntry,
}

// ── App ─────────────────────────────────────────────────────

pub struct TuiApp {
    resolver: SecretResolver,

    messages: Vec<String>,
    streaming_idx: Option<usize>,
    scroll_offset: u16,
    follow_tail: bool,

    input: String,
    cursor: usize,
    mode: InputMode,
    autocomplete: SlashAutocomplete,

    processing: bool,
    session: Option<ChatSession>,
    turn_handle: Option<JoinHandle<ChatSession>>,
    event_rx: Option<mpsc::UnboundedReceiver<ChatEvent>>,
    cancel_tx: Option<watch::Sender<bool>>,
    clear_after_turn: bool,

    pending_attachment: Option<PathBuf>,
    should_quit: bool,
}

impl TuiApp {
    pub fn new(resolver: SecretResolver) -> Self {
        Self {
            resolver,
            messages: vec!["Welcome to polychat. Type a message, or /help for commands.".into()],
            streaming_idx: None,
            scroll_offset: 0,
            follow_tail: true,
            input: String::new(),
            cursor: 0,
            mode: InputMode::Compose,
            autocomplete: SlashAutocomplete::new(),
            processing: false,
            session: None,
            turn_handle: None,
            event_rx: None,
            cancel_tx: None,
            clear_after_turn: false,
            pending_attachment: None,
            should_quit: false,
        }
    }

    pub async fn run(mut self, mut session: ChatSession) -> Result<UiExitAction> {
        let (value, _source) = session.settings.ensure_key(&mut self.resolver);
        if value.is_empty() {
            self.messages.push(format!(
                "[no {} found; use /key to enter one]",
                session.settings.provider.key_env()
            ));
        }
        self.session = Some(session);

        let mut terminal = ratatui::init();
        let _guard = TerminalGuard;

        loop {
            terminal.draw(|f| self.draw(f))?;
            self.drain_events().await;

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Release && self.handle_key(key) {
                        break;
                    }
                }
            }
        }

        if let Some(tx) = &self.cancel_tx {
            let _ = tx.send(true);
        }
        Ok(UiExitAction::Quit)
    }

    // ── Turn lifecycle ──────────────────────────────────────

    fn send_message(&mut self, text: String) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        // Pick up a key that appeared in the environment since startup.
        let _ = session.settings.ensure_key(&mut self.resolver);

        self.messages.push(format!("You: {}", text));
        if let Some(path) = &self.pending_attachment {
            self.messages.push(format!("[attachment: {}]", path.display()));
        }
        self.streaming_idx = None;
        self.processing = true;
        self.follow_tail = true;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.event_rx = Some(events_rx);
        self.cancel_tx = Some(cancel_tx);
        self.turn_handle = Some(chat::spawn_turn(
            session,
            text,
            self.pending_attachment.take(),
            events_tx,
            cancel_rx,
        ));
    }

    async fn drain_events(&mut self) {
        let Some(mut rx) = self.event_rx.take() else {
            return;
        };
        let mut finished = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                ChatEvent::Fragment { partial, .. } => {
                    let line = format!("Assistant: {}", partial);
                    match self.streaming_idx {
                        Some(idx) => self.messages[idx] = line,
                        None => {
                            self.messages.push(line);
                            self.streaming_idx = Some(self.messages.len() - 1);
                        }
                    }
                    self.follow_tail = true;
                }
                ChatEvent::Warning(warning) => {
                    self.messages.push(format!("[warn] {}", warning));
                }
                ChatEvent::Finished(outcome) => {
                    self.finish_turn(outcome);
                    finished = true;
                    break;
                }
            }
        }
        if finished {
            if let Some(handle) = self.turn_handle.take() {
                match handle.await {
                    Ok(mut session) => {
                        if self.clear_after_turn {
                            session.clear();
                            self.messages.clear();
                            self.messages.push("[conversation cleared]".into());
                            self.clear_after_turn = false;
                        }
                        self.session = Some(session);
                    }
                    Err(e) => {
                        self.messages.push(format!("[error] turn task failed: {}", e));
                    }
                }
            }
            self.cancel_tx = None;
            self.processing = false;
            // rx dropped (not put back)
        } else {
            self.event_rx = Some(rx);
        }
    }

    fn finish_turn(&mut self, outcome: TurnOutcome) {
        // Strip the streaming caret by rewriting the final text.
        let finalize = |messages: &mut Vec<String>, idx: Option<usize>, text: &str| {
            if let Some(idx) = idx {
                messages[idx] = format!("Assistant: {}", text);
            } else if !text.is_empty() {
                messages.push(format!("Assistant: {}", text));
            }
        };
        match outcome {
            TurnOutcome::Completed { text } => {
                if text.is_empty() {
                    self.messages.push("[no response text]".into());
                } else {
                    finalize(&mut self.messages, self.streaming_idx, &text);
                }
            }
            TurnOutcome::Failed {
                error,
                partial,
                hint,
            } => {
                if let Some(partial) = partial {
                    finalize(&mut self.messages, self.streaming_idx, &partial);
                    self.messages
                        .push("[reply interrupted; partial text kept in history]".into());
                }
                self.messages.push(format!("[error] {}", error));
                if let Some(hint) = hint {
                    self.messages.push(format!("[hint] {}", hint));
                }
            }
            TurnOutcome::Cancelled { partial } => {
                if let Some(partial) = partial {
                    finalize(&mut self.messages, self.streaming_idx, &partial);
                }
                self.messages.push("[cancelled]".into());
            }
        }
        self.streaming_idx = None;
        self.follow_tail = true;
    }

    fn cancel_streaming(&mut self) {
        if let Some(tx) = &self.cancel_tx {
            let _ = tx.send(true);
        }
    }

    // ── Key handling ────────────────────────────────────────

    /// Returns true when the app should exit.
    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.cancel_streaming();
            return true;
        }

        if matches!(self.mode, InputMode::KeyEntry) {
            return self.handle_key_entry(key);
        }

        match key.code {
            KeyCode::Up if self.autocomplete.visible => self.autocomplete.move_up(),
            KeyCode::Down if self.autocomplete.visible => self.autocomplete.move_down(),
            KeyCode::Tab if self.autocomplete.visible => self.accept_completion(),
            KeyCode::Esc => {
                if self.autocomplete.visible {
                    self.autocomplete.dismiss();
                } else if self.processing {
                    self.cancel_streaming();
                }
            }
            KeyCode::Enter => {
                if self.autocomplete.visible {
                    self.accept_completion();
                } else {
                    self.submit();
                }
            }
            KeyCode::Char(c) => {
                let idx = self.byte_index();
                self.input.insert(idx, c);
                self.cursor += 1;
                self.autocomplete.update_filter(&self.input);
            }
            KeyCode::Backspace => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    let idx = self.byte_index();
                    self.input.remove(idx);
                }
                self.autocomplete.update_filter(&self.input);
            }
            KeyCode::Left => self.cursor = self.cursor.saturating_sub(1),
            KeyCode::Right => {
                if self.cursor < self.input.chars().count() {
                    self.cursor += 1;
                }
            }
            KeyCode::Home => self.cursor = 0,
            KeyCode::End => self.cursor = self.input.chars().count(),
            KeyCode::PageUp => {
                self.follow_tail = false;
                self.scroll_offset = self.scroll_offset.saturating_sub(5);
            }
            KeyCode::PageDown => self.scroll_offset = self.scroll_offset.saturating_add(5),
            _ => {}
        }
        self.should_quit
    }

    fn handle_key_entry(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Enter => {
                let value = std::mem::take(&mut self.input);
                self.cursor = 0;
                self.mode = InputMode::Compose;
                if value.is_empty() {
                    self.messages.push("[key unchanged]".into());
                } else if let Some(session) = &mut self.session {
                    session.settings.set_user_key(value);
                    self.messages.push("[key set for this session]".into());
                }
            }
            KeyCode::Esc => {
                self.input.clear();
                self.cursor = 0;
                self.mode = InputMode::Compose;
                self.messages.push("[key unchanged]".into());
            }
            KeyCode::Char(c) => {
                let idx = self.byte_index();
                self.input.insert(idx, c);
                self.cursor += 1;
            }
            KeyCode::Backspace => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    let idx = self.byte_index();
                    self.input.remove(idx);
                }
            }
            _ => {}
        }
        false
    }

    fn byte_index(&self) -> usize {
        self.input
            .char_indices()
            .nth(self.cursor)
            .map_or(self.input.len(), |(i, _)| i)
    }

    fn accept_completion(&mut self) {
        if let Some(cmd) = self.autocomplete.selected_command() {
            self.input = format!("{} ", cmd);
            self.cursor = self.input.chars().count();
        }
        self.autocomplete.dismiss();
    }

    fn submit(&mut self) {
        let input = self.input.trim().to_string();
        if input.is_empty() {
            return;
        }
        self.input.clear();
        self.cursor = 0;
        self.autocomplete.dismiss();

        if is_slash_command(&input) {
            return self.execute_command(&input);
        }
        if self.processing {
            self.messages
                .push("[wait for the current reply to finish, or Esc to cancel]".into());
            return;
        }
        self.send_message(input);
    }

    // ── Commands ────────────────────────────────────────────

    fn execute_command(&mut self, input: &str) {
        let mut parts = input[1..].splitn(2, ' ');
        let name = parts.next().unwrap_or("").to_lowercase();
        let arg = parts.next().map(str::trim).unwrap_or("").to_string();

        match name.as_str() {
            "help" => {
                for cmd in SLASH_COMMANDS {
                    self.messages
                        .push(format!("{:<12} {}", cmd.name, cmd.description));
                }
            }
            "clear" => {
                if self.processing {
                    self.cancel_streaming();
                    self.clear_after_turn = true;
                } else if let Some(session) = &mut self.session {
                    session.clear();
                    self.messages.clear();
                    self.messages.push("[conversation cleared]".into());
                }
                self.scroll_offset = 0;
                self.follow_tail = true;
            }
            "provider" => self.switch_provider(&arg),
            "model" => self.switch_model(&arg),
            "endpoint" => {
                if arg.is_empty() {
                    self.messages.push("Usage: /endpoint <ep-...>".into());
                } else if let Some(session) = &mut self.session {
                    session.settings.endpoint_id = arg.clone();
                    self.messages.push(format!("[endpoint set to {}]", arg));
                }
            }
            "key" => {
                self.mode = InputMode::KeyEntry;
                self.input.clear();
                self.cursor = 0;
            }
            "think" => {
                if let Some(session) = &mut self.session {
                    session.settings.deep_think = !session.settings.deep_think;
                    let state = if session.settings.deep_think { "on" } else { "off" };
                    self.messages.push(format!("[deep-think {}]", state));
                }
            }
            "attach" => self.attach(&arg),
            "detach" => {
                self.pending_attachment = None;
                self.messages.push("[attachment dropped]".into());
            }
            "quit" | "exit" => {
                self.cancel_streaming();
                self.should_quit = true;
            }
            other => self
                .messages
                .push(format!("[error] unknown command '/{}'; try /help", other)),
        }
    }

    fn switch_provider(&mut self, arg: &str) {
        let names = ProviderKind::ALL
            .iter()
            .map(|k| k.config_name())
            .collect::<Vec<_>>()
            .join(", ");
        if arg.is_empty() {
            self.messages.push(format!("Providers: {}", names));
            return;
        }
        let Some(kind) = ProviderKind::parse(arg) else {
            self.messages
                .push(format!("[error] unknown provider '{}'; one of: {}", arg, names));
            return;
        };
        if self.processing {
            self.messages
                .push("[finish or cancel the current reply first]".into());
            return;
        }
        if let Some(session) = &mut self.session {
            session.settings.provider = kind;
            session.settings.model.clear();
            let (value, source) = session.settings.ensure_key(&mut self.resolver);
            self.messages
                .push(format!("[provider switched to {}]", kind.display_name()));
            if value.is_empty() {
                self.messages
                    .push(format!("[no {} found; use /key to enter one]", kind.key_env()));
            } else if source == KeySource::Configured {
                self.messages
                    .push(format!("[using configured {}]", kind.key_env()));
            }
        }
    }

    fn switch_model(&mut self, arg: &str) {
        let Some(session) = &mut self.session else {
            return;
        };
        let kind = session.settings.provider;
        if kind.uses_endpoint_id() {
            self.messages
                .push(format!("{} takes an endpoint ID; use /endpoint", kind.display_name()));
            return;
        }
        if arg.is_empty() {
            self.messages
                .push(format!("Models: {}", kind.models().join(", ")));
            return;
        }
        session.settings.model = arg.to_string();
        if !kind.models().contains(&arg) {
            self.messages
                .push(format!("[warn] '{}' is not in the known model list", arg));
        }
        self.messages.push(format!("[model set to {}]", arg));
    }

    fn attach(&mut self, arg: &str) {
        if arg.is_empty() {
            self.messages.push("Usage: /attach <path>".into());
            return;
        }
        let path = PathBuf::from(arg);
        if !path.is_file() {
            self.messages.push(format!("[error] no such file: {}", arg));
        } else if !attachment::is_accepted(arg) {
            self.messages.push(format!(
                "[error] unsupported file type; accepted: {}",
                attachment::ACCEPTED_EXTENSIONS.join(", ")
            ));
        } else {
            self.messages
                .push(format!("[will attach {} to the next message]", path.display()));
            self.pending_attachment = Some(path);
        }
    }

    // ── Drawing ─────────────────────────────────────────────

    fn draw(&mut self, f: &mut Frame) {
        let chunks = Layout::vertical([
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(3),
        ])
        .split(f.area());

        self.draw_status(f, chunks[0]);
        self.draw_transcript(f, chunks[1]);
        self.draw_input(f, chunks[2]);
        if self.autocomplete.visible {
            self.draw_autocomplete(f, chunks[2]);
        }
    }

    fn draw_status(&self, f: &mut Frame, area: Rect) {
        let mut spans: Vec<Span> = Vec::new();
        if let Some(session) = &self.session {
            let settings = &session.settings;
            let model = settings.effective_model();
            spans.push(Span::styled(
                settings.provider.display_name().to_string(),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ));
            spans.push(Span::raw(format!(
                "  model: {}",
                if model.is_empty() { "(unset)" } else { model.as_str() }
            )));
            spans.push(Span::raw(format!(
                "  deep-think: {}",
                if settings.deep_think { "on" } else { "off" }
            )));
            let key_state = match session.settings.key_entry() {
                Some(entry) if entry.source == KeySource::Configured => "configured",
                Some(_) => "set",
                None => "missing",
            };
            spans.push(Span::raw(format!("  key: {}", key_state)));
        } else {
            spans.push(Span::styled(
                "streaming...",
                Style::default().fg(Color::Yellow),
            ));
        }
        if let Some(path) = &self.pending_attachment {
            spans.push(Span::styled(
                format!(
                    "  attachment: {}",
                    path.file_name().and_then(|n| n.to_str()).unwrap_or("?")
                ),
                Style::default().fg(Color::Yellow),
            ));
        }
        let paragraph = Paragraph::new(Line::from(spans)).block(Block::bordered().title("polychat"));
        f.render_widget(paragraph, area);
    }

    fn draw_transcript(&mut self, f: &mut Frame, area: Rect) {
        let mut lines: Vec<Line> = Vec::new();
        for message in &self.messages {
            if let Some(rest) = message.strip_prefix("Assistant: ") {
                lines.push(Line::from(Span::styled(
                    "Assistant:",
                    Style::default()
                        .fg(Color::Magenta)
                        .add_modifier(Modifier::BOLD),
                )));
                lines.extend(markdown::render_markdown(rest));
            } else if let Some(rest) = message.strip_prefix("You: ") {
                lines.push(Line::from(vec![
                    Span::styled(
                        "You: ",
                        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                    ),
                    Span::raw(rest.to_string()),
                ]));
            } else {
                let style = if message.starts_with("[error]") {
                    Style::default().fg(Color::Red)
                } else if message.starts_with("[warn]") || message.starts_with("[hint]") {
                    Style::default().fg(Color::Yellow)
                } else {
                    Style::default().fg(Color::DarkGray)
                };
                lines.push(Line::from(Span::styled(message.clone(), style)));
            }
        }

        let viewport = area.height.saturating_sub(2);
        let total = lines.len() as u16;
        let max_scroll = total.saturating_sub(viewport);
        if self.follow_tail {
            self.scroll_offset = max_scroll;
        } else {
            self.scroll_offset = self.scroll_offset.min(max_scroll);
        }

        let paragraph = Paragraph::new(lines)
            .block(Block::bordered().title("Conversation"))
            .wrap(Wrap { trim: false })
            .scroll((self.scroll_offset, 0));
        f.render_widget(paragraph, area);
    }

    fn draw_input(&self, f: &mut Frame, area: Rect) {
        let (title, shown): (&str, String) = match self.mode {
            InputMode::Compose => {
                let title = if self.processing {
                    "Message (streaming... Esc cancels)"
                } else {
                    "Message (/ for commands)"
                };
                (title, self.input.clone())
            }
            InputMode::KeyEntry => (
                "API key (hidden) - Enter saves, Esc cancels",
                "*".repeat(self.input.chars().count()),
            ),
        };
        let paragraph = Paragraph::new(shown).block(Block::bordered().title(title));
        f.render_widget(paragraph, area);
        f.set_cursor_position((area.x + 1 + self.cursor as u16, area.y + 1));
    }

    fn draw_autocomplete(&self, f: &mut Frame, input_area: Rect) {
        let height = (self.autocomplete.filtered.len() as u16 + 2).min(8);
        let area = Rect {
            x: input_area.x,
            y: input_area.y.saturating_sub(height),
            width: input_area.width.min(56),
            height,
        };
        let lines: Vec<Line> = self
            .autocomplete
            .filtered
            .iter()
            .enumerate()
            .map(|(i, &cmd_idx)| {
                let cmd = &SLASH_COMMANDS[cmd_idx];
                let style = if i == self.autocomplete.selected {
                    Style::default().fg(Color::Black).bg(Color::Cyan)
                } else {
                    Style::default()
                };
                Line::from(Span::styled(
                    format!("{:<10} {}", cmd.name, cmd.description),
                    style,
                ))
            })
            .collect();
        f.render_widget(Clear, area);
        let paragraph = Paragraph::new(lines).block(Block::bordered().title("commands"));
        f.render_widget(paragraph, area);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_slash_command() {
        assert!(is_slash_command("/help"));
        assert!(is_slash_command("/attach notes.txt"));
        assert!(!is_slash_command("hello"));
        assert!(!is_slash_command("/"));
        assert!(!is_slash_command("/HELP"));
    }

    #[test]
    fn test_autocomplete_filters_by_prefix() {
        let mut ac = SlashAutocomplete::new();
        ac.update_filter("/th");
        assert!(ac.visible);
        assert_eq!(ac.selected_command(), Some("/think"));

        ac.update_filter("/think on");
        assert!(!ac.visible);
    }

    #[test]
    fn test_autocomplete_wraps_selection() {
        let mut ac = SlashAutocomplete::new();
        ac.update_filter("/");
        let n = ac.filtered.len();
        assert!(n > 1);
        ac.move_up();
        assert_eq!(ac.selected, n - 1);
        ac.move_down();
        assert_eq!(ac.selected, 0);
    }
}
