//! Chat loop - the per-turn orchestrator.
//!
//! Each turn moves through the states
//! `Validating -> Extracting -> Dispatching -> Streaming -> Committing`;
//! any turn-fatal error short-circuits back to idle without touching
//! later states. One turn is processed to completion before the next
//! input is accepted; the streamed response is the only suspension
//! point, and it is the cancellation point for the clear action.

use std::collections::HashMap;
use std::path::PathBuf;

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::attachment;
use crate::config::AppConfig;
use crate::conversation::Conversation;
use crate::error::ChatError;
use crate::providers::{self, FragmentStream, ProviderConfig, ProviderKind};
use crate::secrets::{KeySource, SecretResolver};
use crate::types::{Attachment, ChatRequest, Turn};

/// Suffix shown after the accumulated text while a reply is streaming.
pub const STREAM_CARET: char = '▌';

/// Prepended to the system instruction when deep-think mode is on.
/// A prompt-text change only, never a protocol field.
pub const DEEP_THINK_DIRECTIVE: &str = "Before answering, work through the problem inside a \
<thinking> tag block - reason step by step, plan, and self-correct - then give your final \
answer after the block.";

/// Gemini models picked when the user has not chosen one explicitly.
const GEMINI_FAST_MODEL: &str = "models/gemini-1.5-flash";
const GEMINI_DEEP_THINK_MODEL: &str = "models/gemini-3-pro-preview";

// --- Events and outcomes ---

/// Progress events emitted while a turn runs. The final state of the
/// turn arrives as [`ChatEvent::Finished`].
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// A streamed fragment: the new delta and the full accumulated
    /// text with the streaming caret appended.
    Fragment { delta: String, partial: String },
    /// Advisory only; the turn continues.
    Warning(String),
    Finished(TurnOutcome),
}

/// How a turn ended. `partial` carries assistant text that was
/// committed to history despite the turn not completing.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    Completed {
        text: String,
    },
    Failed {
        error: ChatError,
        partial: Option<String>,
        hint: Option<String>,
    },
    Cancelled {
        partial: Option<String>,
    },
}

// --- Session settings ---

#[derive(Debug, Clone)]
pub struct KeyEntry {
    pub value: String,
    pub source: KeySource,
}

/// Mutable per-session selection state. The provider configuration is
/// rebuilt from this fresh on every turn; nothing here is persisted.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub provider: ProviderKind,
    /// Empty means the provider default (for Gemini, the mode preset).
    pub model: String,
    pub endpoint_id: String,
    pub deep_think: bool,
    pub system_instruction: String,
    keys: HashMap<String, KeyEntry>,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            provider: config.provider_kind(),
            model: config.chat.model.clone(),
            endpoint_id: config.chat.endpoint_id.clone(),
            deep_think: config.chat.deep_think,
            system_instruction: config.chat.system_prompt.clone(),
            keys: HashMap::new(),
        }
    }

    /// Resolve the current provider's key if not already held,
    /// soliciting through the resolver's fallback channel.
    pub fn ensure_key(&mut self, resolver: &mut SecretResolver) -> (String, KeySource) {
        let env_name = self.provider.key_env();
        if let Some(entry) = self.keys.get(env_name) {
            if !entry.value.is_empty() {
                return (entry.value.clone(), entry.source);
            }
        }
        let label = format!("{} API key", self.provider.display_name());
        let (value, source) = resolver.resolve(env_name, &label);
        if !value.is_empty() {
            self.keys.insert(
                env_name.to_string(),
                KeyEntry {
                    value: value.clone(),
                    source,
                },
            );
        }
        (value, source)
    }

    /// Store a key typed by the user for the current provider.
    pub fn set_user_key(&mut self, value: String) {
        self.keys.insert(
            self.provider.key_env().to_string(),
            KeyEntry {
                value,
                source: KeySource::UserSupplied,
            },
        );
    }

    pub fn key_entry(&self) -> Option<&KeyEntry> {
        self.keys.get(self.provider.key_env())
    }

    pub fn current_key_value(&self) -> &str {
        self.key_entry().map(|e| e.value.as_str()).unwrap_or("")
    }

    /// The model identifier that actually goes on the wire: the
    /// endpoint ID for Ark, the explicit selection, or the default.
    pub fn effective_model(&self) -> String {
        if self.provider.uses_endpoint_id() {
            return self.endpoint_id.clone();
        }
        if !self.model.is_empty() {
            return self.model.clone();
        }
        match self.provider {
            ProviderKind::Gemini if self.deep_think => GEMINI_DEEP_THINK_MODEL.to_string(),
            ProviderKind::Gemini => GEMINI_FAST_MODEL.to_string(),
            other => other.default_model().to_string(),
        }
    }

    /// System instruction with the deep-think directive prepended when
    /// that mode is on.
    pub fn system_with_mode(&self) -> String {
        if self.deep_think {
            format!("{}\n\n{}", DEEP_THINK_DIRECTIVE, self.system_instruction)
        } else {
            self.system_instruction.clone()
        }
    }

    /// Fresh provider selection for one turn.
    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            kind: self.provider,
            base_url: self.provider.base_url().map(str::to_string),
            api_key: self.current_key_value().to_string(),
            model: self.effective_model(),
            system_instruction: self.system_with_mode(),
            supports_image: self.provider.supports_image(),
        }
    }
}

// --- Session ---

pub struct ChatSession {
    pub settings: SessionSettings,
    conversation: Conversation,
}

impl ChatSession {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            conversation: Conversation::new(),
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Reset the transcript. In-flight turns must be cancelled first;
    /// the UIs do that by flipping the watch channel and waiting for
    /// [`ChatEvent::Finished`].
    pub fn clear(&mut self) {
        self.conversation.clear();
    }

    /// Run one turn to completion. Never panics and never returns
    /// `Err`; every failure mode is a [`TurnOutcome`] variant.
    pub async fn process_turn(
        &mut self,
        prompt: String,
        attachment_path: Option<PathBuf>,
        events: &mpsc::UnboundedSender<ChatEvent>,
        cancel: watch::Receiver<bool>,
    ) -> TurnOutcome {
        // Validating
        let kind = self.settings.provider;
        if self.settings.current_key_value().trim().is_empty() {
            return TurnOutcome::Failed {
                error: ChatError::Config(format!(
                    "{} API key is not set; provide one with /key",
                    kind.display_name()
                )),
                partial: None,
                hint: None,
            };
        }
        if kind.uses_endpoint_id() && self.settings.endpoint_id.trim().is_empty() {
            return TurnOutcome::Failed {
                error: ChatError::Config(format!(
                    "{} needs an endpoint ID (ep-*); set one with /endpoint",
                    kind.display_name()
                )),
                partial: None,
                hint: None,
            };
        }

        // Fresh provider selection for this turn.
        let provider_config = self.settings.provider_config();

        // Extracting - failures degrade, never abort.
        let attachment = match &attachment_path {
            None => Attachment::None,
            Some(path) => match tokio::fs::read(path).await {
                Ok(bytes) => {
                    let name = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or_default();
                    attachment::extract(name, &bytes)
                }
                Err(e) => {
                    let _ = events.send(ChatEvent::Warning(format!(
                        "could not read {}: {}; sending the prompt without it",
                        path.display(),
                        e
                    )));
                    Attachment::None
                }
            },
        };
        let had_image = attachment.is_image();
        let had_document = attachment.is_document();

        if had_image && !provider_config.supports_image {
            let _ = events.send(ChatEvent::Warning(format!(
                "{} is not known to accept image input; the request may be rejected",
                kind.display_name()
            )));
        }

        // Dispatching
        let adapter = providers::create_adapter(&provider_config);
        let outbound_prompt = match &attachment {
            Attachment::Text(document) => format!("{}{}", prompt, document),
            _ => prompt.clone(),
        };
        let image = match attachment {
            Attachment::Image(image) => Some(image),
            _ => None,
        };
        let request = ChatRequest {
            model: provider_config.model.clone(),
            system_instruction: provider_config.system_instruction.clone(),
            history: self.conversation.turns().to_vec(),
            prompt: outbound_prompt,
            image,
        };

        tracing::debug!(
            provider = %kind,
            model = %request.model,
            history_turns = request.history.len(),
            had_image,
            had_document,
            "dispatching turn"
        );

        // Streaming
        let stream = match adapter.open_stream(&request).await {
            Ok(stream) => stream,
            Err(error) => {
                let hint =
                    providers::incompatibility_hint(kind, &request.model, had_image, &error.to_string());
                return TurnOutcome::Failed {
                    error,
                    partial: None,
                    hint,
                };
            }
        };
        let run = drive_stream(stream, events, cancel).await;

        // Committing
        let user_turn = Turn::user_with_markers(prompt, had_image, had_document);
        if run.cancelled {
            tracing::debug!(partial_len = run.accumulated.len(), "turn cancelled");
            let partial = commit_turn(&mut self.conversation, user_turn, run.accumulated, false);
            return TurnOutcome::Cancelled { partial };
        }
        if let Some(error) = run.error {
            let hint =
                providers::incompatibility_hint(kind, &request.model, had_image, &error.to_string());
            let partial = commit_turn(&mut self.conversation, user_turn, run.accumulated, false);
            return TurnOutcome::Failed {
                error,
                partial,
                hint,
            };
        }
        let text = run.accumulated;
        commit_turn(&mut self.conversation, user_turn, text.clone(), true);
        TurnOutcome::Completed { text }
    }
}

/// Run a turn on the runtime, handing the session back when done. The
/// outcome is delivered through the event channel as
/// [`ChatEvent::Finished`] just before the task resolves.
pub fn spawn_turn(
    mut session: ChatSession,
    prompt: String,
    attachment_path: Option<PathBuf>,
    events: mpsc::UnboundedSender<ChatEvent>,
    cancel: watch::Receiver<bool>,
) -> JoinHandle<ChatSession> {
    tokio::spawn(async move {
        let outcome = session
            .process_turn(prompt, attachment_path, &events, cancel)
            .await;
        let _ = events.send(ChatEvent::Finished(outcome));
        session
    })
}

// --- Streaming consumption ---

struct StreamRun {
    accumulated: String,
    error: Option<ChatError>,
    cancelled: bool,
}

/// Pull fragments until the stream ends, errors, or the cancel signal
/// flips. Accumulation is order-preserving; empty fragments change
/// nothing. Dropping the stream on exit closes the connection.
async fn drive_stream(
    mut stream: FragmentStream,
    events: &mpsc::UnboundedSender<ChatEvent>,
    mut cancel: watch::Receiver<bool>,
) -> StreamRun {
    let mut run = StreamRun {
        accumulated: String::new(),
        error: None,
        cancelled: false,
    };

    if *cancel.borrow() {
        run.cancelled = true;
        return run;
    }

    let mut cancel_open = true;
    loop {
        tokio::select! {
            changed = cancel.changed(), if cancel_open => match changed {
                Ok(()) => {
                    if *cancel.borrow() {
                        run.cancelled = true;
                        break;
                    }
                }
                Err(_) => cancel_open = false,
            },
            item = stream.next() => match item {
                None => break,
                Some(Ok(delta)) => {
                    if delta.is_empty() {
                        continue;
                    }
                    run.accumulated.push_str(&delta);
                    let mut partial = run.accumulated.clone();
                    partial.push(STREAM_CARET);
                    let _ = events.send(ChatEvent::Fragment { delta, partial });
                }
                Some(Err(e)) => {
                    run.error = Some(e);
                    break;
                }
            },
        }
    }
    run
}

/// Apply the commit rules: a completed turn always commits the user
/// turn and, when any text arrived, the assistant turn; an aborted or
/// cancelled turn commits both only if at least one fragment had
/// arrived, and nothing otherwise.
fn commit_turn(
    conversation: &mut Conversation,
    user_turn: Turn,
    accumulated: String,
    completed: bool,
) -> Option<String> {
    if !completed && accumulated.is_empty() {
        return None;
    }
    conversation.push(user_turn);
    if accumulated.is_empty() {
        return None;
    }
    conversation.push(Turn::assistant(accumulated.clone()));
    Some(accumulated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;
    use futures_util::stream;

    fn settings_for(provider: ProviderKind) -> SessionSettings {
        let mut config = AppConfig::default();
        config.chat.provider = provider.config_name().to_string();
        SessionSettings::from_config(&config)
    }

    fn channels() -> (
        mpsc::UnboundedSender<ChatEvent>,
        mpsc::UnboundedReceiver<ChatEvent>,
        watch::Sender<bool>,
        watch::Receiver<bool>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        (tx, rx, cancel_tx, cancel_rx)
    }

    fn fragments(items: Vec<Result<&'static str, ChatError>>) -> FragmentStream {
        Box::pin(stream::iter(
            items.into_iter().map(|r| r.map(str::to_string)),
        ))
    }

    #[tokio::test]
    async fn test_empty_api_key_blocks_dispatch_and_appends_nothing() {
        let mut session = ChatSession::new(settings_for(ProviderKind::Gemini));
        let (tx, _rx, _cancel_tx, cancel_rx) = channels();

        let outcome = session
            .process_turn("hi".into(), None, &tx, cancel_rx)
            .await;

        match outcome {
            TurnOutcome::Failed { error, partial, .. } => {
                assert!(matches!(error, ChatError::Config(_)));
                assert!(partial.is_none());
            }
            other => panic!("expected config failure, got {:?}", other),
        }
        assert!(session.conversation().is_empty());
    }

    #[tokio::test]
    async fn test_empty_endpoint_id_rejected_like_empty_key() {
        let mut settings = settings_for(ProviderKind::Volc);
        settings.set_user_key("some-key".into());
        let mut session = ChatSession::new(settings);
        let (tx, _rx, _cancel_tx, cancel_rx) = channels();

        let outcome = session
            .process_turn("hi".into(), None, &tx, cancel_rx)
            .await;

        match outcome {
            TurnOutcome::Failed { error, .. } => {
                assert!(matches!(error, ChatError::Config(_)));
                assert!(error.to_string().contains("endpoint ID"));
            }
            other => panic!("expected config failure, got {:?}", other),
        }
        assert!(session.conversation().is_empty());
    }

    #[tokio::test]
    async fn test_accumulation_is_order_preserving_and_skips_empty_fragments() {
        let (tx, mut rx, _cancel_tx, cancel_rx) = channels();
        let stream = fragments(vec![Ok("Hel"), Ok(""), Ok("lo")]);

        let run = drive_stream(stream, &tx, cancel_rx).await;

        assert_eq!(run.accumulated, "Hello");
        assert!(run.error.is_none());
        assert!(!run.cancelled);

        let mut partials = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ChatEvent::Fragment { partial, .. } = event {
                partials.push(partial);
            }
        }
        assert_eq!(partials, vec!["Hel▌", "Hello▌"]);
    }

    #[tokio::test]
    async fn test_stream_error_keeps_text_accumulated_so_far() {
        let (tx, _rx, _cancel_tx, cancel_rx) = channels();
        let stream = fragments(vec![Ok("part"), Err(ChatError::Stream("dropped".into()))]);

        let run = drive_stream(stream, &tx, cancel_rx).await;

        assert_eq!(run.accumulated, "part");
        assert!(matches!(run.error, Some(ChatError::Stream(_))));
    }

    #[tokio::test]
    async fn test_pre_cancelled_stream_yields_nothing() {
        let (tx, _rx, cancel_tx, cancel_rx) = channels();
        cancel_tx.send(true).unwrap();
        let stream = fragments(vec![Ok("never")]);

        let run = drive_stream(stream, &tx, cancel_rx).await;

        assert!(run.cancelled);
        assert!(run.accumulated.is_empty());
    }

    #[test]
    fn test_commit_rules() {
        // Zero-fragment failure: nothing committed.
        let mut conv = Conversation::new();
        let committed = commit_turn(&mut conv, Turn::user("q"), String::new(), false);
        assert!(committed.is_none());
        assert!(conv.is_empty());

        // Mid-stream failure after fragments: user + partial committed.
        let mut conv = Conversation::new();
        let committed = commit_turn(&mut conv, Turn::user("q"), "par".to_string(), false);
        assert_eq!(committed.as_deref(), Some("par"));
        assert_eq!(conv.len(), 2);

        // Success: user + assistant committed.
        let mut conv = Conversation::new();
        let committed = commit_turn(&mut conv, Turn::user("q"), "full".to_string(), true);
        assert_eq!(committed.as_deref(), Some("full"));
        assert_eq!(conv.len(), 2);
    }

    #[test]
    fn test_deep_think_prepends_directive() {
        let mut settings = settings_for(ProviderKind::Gemini);
        assert!(!settings.system_with_mode().contains("<thinking>"));
        settings.deep_think = true;
        let augmented = settings.system_with_mode();
        assert!(augmented.starts_with(DEEP_THINK_DIRECTIVE));
        assert!(augmented.ends_with(&settings.system_instruction));
    }

    #[test]
    fn test_effective_model_presets() {
        let mut settings = settings_for(ProviderKind::Gemini);
        assert_eq!(settings.effective_model(), GEMINI_FAST_MODEL);
        settings.deep_think = true;
        assert_eq!(settings.effective_model(), GEMINI_DEEP_THINK_MODEL);
        settings.model = "models/gemini-1.5-pro".to_string();
        assert_eq!(settings.effective_model(), "models/gemini-1.5-pro");

        let mut settings = settings_for(ProviderKind::Volc);
        settings.endpoint_id = "ep-1234".to_string();
        assert_eq!(settings.effective_model(), "ep-1234");

        let settings = settings_for(ProviderKind::DeepSeek);
        assert_eq!(settings.effective_model(), "deepseek-chat");
    }

    #[test]
    fn test_key_entry_tracks_source() {
        let mut settings = settings_for(ProviderKind::DeepSeek);
        assert!(settings.current_key_value().is_empty());
        settings.set_user_key("sk-abc".into());
        let entry = settings.key_entry().unwrap();
        assert_eq!(entry.value, "sk-abc");
        assert_eq!(entry.source, KeySource::UserSupplied);
    }
}
