//! Core data types used throughout polychat.
//!
//! This module defines the conversation turn types, the uniform chat
//! request that provider adapters translate into their wire formats,
//! and the attachment representation that flows between components.

use serde::{Deserialize, Serialize};

// --- Message Roles ---

/// The role of a turn in the conversation.
///
/// Only the two display roles exist here; the system instruction is
/// carried separately on [`ChatRequest`] because providers place it in
/// different parts of their payloads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

// --- Turns ---

/// A single turn in the conversation history.
///
/// Immutable once appended. Attachments are never stored verbatim;
/// only the boolean markers survive into history, so documents and
/// images are not resent on later turns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub display_text: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub had_image: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub had_document: bool,
}

fn is_false(b: &bool) -> bool {
    !b
}

impl Turn {
    /// Create a plain user turn.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            display_text: text.into(),
            had_image: false,
            had_document: false,
        }
    }

    /// Create a user turn carrying attachment markers.
    pub fn user_with_markers(text: impl Into<String>, had_image: bool, had_document: bool) -> Self {
        Self {
            role: Role::User,
            display_text: text.into(),
            had_image,
            had_document,
        }
    }

    /// Create an assistant turn.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            display_text: text.into(),
            had_image: false,
            had_document: false,
        }
    }
}

// --- Attachments ---

/// An uploaded image, decoded and normalized to JPEG at extraction time.
///
/// Providers only ever need the JPEG bytes (base64-encoded into their
/// payloads), so the decoded bitmap is not kept around.
#[derive(Clone, PartialEq)]
pub struct EncodedImage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("jpeg_len", &self.jpeg.len())
            .finish()
    }
}

/// The result of extracting an uploaded file, at most one per turn.
///
/// Exactly one of text or image is populated per extraction; images
/// short-circuit before any text handling is attempted.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Attachment {
    #[default]
    None,
    /// Extracted document text, already wrapped in the delimiter template.
    Text(String),
    Image(EncodedImage),
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        matches!(self, Attachment::Image(_))
    }

    pub fn is_document(&self) -> bool {
        matches!(self, Attachment::Text(_))
    }
}

// --- Chat Request ---

/// The uniform request handed to a provider adapter.
///
/// `history` holds the committed turns only; the in-flight user turn is
/// carried as `prompt` (with any extracted document text already
/// appended) plus the optional `image`.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model identifier, or the endpoint ID for providers that use one.
    pub model: String,
    /// System instruction, already deep-think-augmented when that mode is on.
    pub system_instruction: String,
    /// Prior conversation, oldest first.
    pub history: Vec<Turn>,
    /// Outbound text for this turn: user prompt plus any document text.
    pub prompt: String,
    /// Image for this turn. When present, adapters must not attach history.
    pub image: Option<EncodedImage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_constructors() {
        let u = Turn::user("hi");
        assert_eq!(u.role, Role::User);
        assert!(!u.had_image && !u.had_document);

        let a = Turn::assistant("hello");
        assert_eq!(a.role, Role::Assistant);

        let m = Turn::user_with_markers("look", true, false);
        assert!(m.had_image);
        assert!(!m.had_document);
    }

    #[test]
    fn test_turn_serde_skips_false_markers() {
        let json = serde_json::to_string(&Turn::user("hi")).unwrap();
        assert!(!json.contains("had_image"));

        let json = serde_json::to_string(&Turn::user_with_markers("hi", true, true)).unwrap();
        assert!(json.contains("had_image"));
        assert!(json.contains("had_document"));
    }

    #[test]
    fn test_attachment_exclusivity_helpers() {
        assert!(!Attachment::None.is_image());
        assert!(!Attachment::None.is_document());
        assert!(Attachment::Text("x".into()).is_document());
        let img = Attachment::Image(EncodedImage {
            jpeg: vec![0xff, 0xd8],
            width: 1,
            height: 1,
        });
        assert!(img.is_image());
        assert!(!img.is_document());
    }
}
