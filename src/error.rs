//! Error taxonomy for a chat turn.
//!
//! Two deliberately distinct kinds exist: [`ExtractionError`] is
//! non-fatal and is absorbed inside attachment extraction (the turn
//! proceeds with placeholder text), while [`ChatError`] aborts the
//! current turn. Neither is retried.

use thiserror::Error;

/// A failure while extracting an uploaded file. Never escalates past
/// the extractor; callers receive placeholder text instead.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to decode image: {0}")]
    ImageDecode(String),
    #[error("failed to read PDF: {0}")]
    Pdf(String),
}

/// A turn-fatal failure. Aborts the current turn only; the session and
/// its history stay usable.
#[derive(Debug, Clone, Error)]
pub enum ChatError {
    /// Missing or empty key/endpoint configuration. Blocks the turn
    /// before any network call.
    #[error("{0}")]
    Config(String),

    /// The provider rejected the request (auth, quota, unknown model,
    /// malformed payload). Carries the upstream message verbatim.
    #[error("{0}")]
    Request(String),

    /// The connection dropped mid-stream.
    #[error("stream interrupted: {0}")]
    Stream(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_error_keeps_upstream_message_verbatim() {
        let e = ChatError::Request("API error (404): model not found".into());
        assert_eq!(e.to_string(), "API error (404): model not found");
    }

    #[test]
    fn test_variants_render_their_prefix() {
        assert!(ChatError::Stream("connection reset".into())
            .to_string()
            .starts_with("stream interrupted"));
        assert_eq!(ChatError::Config("no key".into()).to_string(), "no key");
    }
}
