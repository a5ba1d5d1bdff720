//! Server-sent-event line framing shared by both adapter families.
//!
//! Both backends stream `data: {json}` lines over a chunked body, with
//! chunk boundaries landing anywhere. The buffer reassembles complete
//! lines; `fragment_stream` turns a byte stream plus a payload parser
//! into the pull-based [`FragmentStream`] the chat loop consumes.

use std::collections::VecDeque;

use futures_util::stream::{self, Stream, StreamExt};

use super::FragmentStream;
use crate::error::ChatError;

/// Reassembles `data:` payloads from arbitrarily split byte chunks.
#[derive(Default)]
pub struct SseLineBuffer {
    buffer: String,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the complete `data:` payloads it closed.
    /// Non-data fields (`event:`, `id:`, comments) are ignored.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut payloads = Vec::new();
        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer[..newline_pos].trim_end_matches('\r').to_string();
            self.buffer.drain(..=newline_pos);

            if line.is_empty() {
                continue;
            }
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

/// What a provider's payload parser made of one `data:` payload.
pub enum Parsed {
    /// Text fragments to emit, in order.
    Fragments(Vec<String>),
    /// End-of-stream marker; remaining buffered bytes are ignored.
    Done,
    /// Nothing of interest in this payload.
    Skip,
}

/// Build a [`FragmentStream`] from a byte stream and a payload parser.
///
/// Read errors end the stream after yielding one [`ChatError::Stream`]
/// item; dropping the returned stream drops the byte stream and with it
/// the connection.
pub fn fragment_stream<S, B, E, F>(bytes: S, parse: F) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
    F: FnMut(&str) -> Parsed + Send + 'static,
{
    let state = (
        Box::pin(bytes),
        SseLineBuffer::new(),
        VecDeque::<String>::new(),
        false,
        parse,
    );

    Box::pin(stream::unfold(
        state,
        |(mut bytes, mut lines, mut pending, mut done, mut parse)| async move {
            loop {
                if let Some(fragment) = pending.pop_front() {
                    return Some((Ok(fragment), (bytes, lines, pending, done, parse)));
                }
                if done {
                    return None;
                }
                match bytes.next().await {
                    None => done = true,
                    Some(Err(e)) => {
                        done = true;
                        return Some((
                            Err(ChatError::Stream(e.to_string())),
                            (bytes, lines, pending, done, parse),
                        ));
                    }
                    Some(Ok(chunk)) => {
                        for payload in lines.push(chunk.as_ref()) {
                            if done {
                                break;
                            }
                            match parse(&payload) {
                                Parsed::Fragments(fragments) => pending.extend(fragments),
                                Parsed::Done => done = true,
                                Parsed::Skip => {}
                            }
                        }
                    }
                }
            }
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[test]
    fn test_payload_split_across_chunks() {
        let mut buf = SseLineBuffer::new();
        assert!(buf.push(b"data: hel").is_empty());
        let payloads = buf.push(b"lo\n");
        assert_eq!(payloads, vec!["hello"]);
    }

    #[test]
    fn test_crlf_and_multiple_lines() {
        let mut buf = SseLineBuffer::new();
        let payloads = buf.push(b"data: one\r\n\r\ndata: two\n");
        assert_eq!(payloads, vec!["one", "two"]);
    }

    #[test]
    fn test_non_data_fields_ignored() {
        let mut buf = SseLineBuffer::new();
        let payloads = buf.push(b"event: ping\nid: 3\n: comment\ndata: real\n");
        assert_eq!(payloads, vec!["real"]);
    }

    #[tokio::test]
    async fn test_fragment_stream_orders_and_skips_empty() {
        let chunks: Vec<Result<Vec<u8>, Infallible>> = vec![
            Ok(b"data: Hel\n".to_vec()),
            Ok(b"data: \n".to_vec()),
            Ok(b"data: lo\ndata: [END]\n".to_vec()),
        ];
        let stream = fragment_stream(stream::iter(chunks), |payload: &str| {
            if payload == "[END]" {
                Parsed::Done
            } else if payload.is_empty() {
                Parsed::Skip
            } else {
                Parsed::Fragments(vec![payload.to_string()])
            }
        });

        let collected: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(collected.join(""), "Hello");
    }

    #[tokio::test]
    async fn test_fragment_stream_stops_after_done_marker() {
        let chunks: Vec<Result<Vec<u8>, Infallible>> = vec![
            Ok(b"data: a\ndata: [END]\ndata: after\n".to_vec()),
        ];
        let stream = fragment_stream(stream::iter(chunks), |payload: &str| {
            if payload == "[END]" {
                Parsed::Done
            } else {
                Parsed::Fragments(vec![payload.to_string()])
            }
        });

        let collected: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(collected, vec!["a"]);
    }
}
