//! Stream events and their JSON wire frames.
//!
//! Every streamed response is zero or more content events followed by
//! exactly one terminal event (`Done` or `Error`). Each event serializes to
//! one flat JSON object which the server writes as an SSE `data:` frame.

use serde_json::{Value, json};

/// Upper bound on diagnostic text surfaced to callers, in characters.
pub const MAX_ERROR_DETAIL: usize = 500;

/// One event of a relayed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Model text (chat endpoint).
    Text { content: String },
    /// Command output (shell endpoint).
    Output { content: String },
    /// Successful completion.
    Done { exit_code: Option<i32> },
    /// Terminal failure.
    Error { message: String },
}

impl StreamEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// JSON object sent to the caller for this event.
    pub fn to_frame(&self) -> Value {
        match self {
            Self::Text { content } => json!({ "text": content }),
            Self::Output { content } => json!({ "output": content }),
            Self::Done { exit_code: None } => json!({ "done": true }),
            Self::Done {
                exit_code: Some(code),
            } => json!({ "done": true, "exit_code": code }),
            Self::Error { message } => json!({ "error": message }),
        }
    }
}

/// Which content event a relay wraps producer fragments in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Output,
}

impl ContentKind {
    pub const fn wrap(self, content: String) -> StreamEvent {
        match self {
            Self::Text => StreamEvent::Text { content },
            Self::Output => StreamEvent::Output { content },
        }
    }
}

/// Truncate `text` to at most `max` characters, respecting char boundaries.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn text_frame() {
        let ev = StreamEvent::Text {
            content: "hi".into(),
        };
        assert_eq!(ev.to_frame(), json!({"text": "hi"}));
    }

    #[test]
    fn done_without_exit_code_omits_field() {
        let ev = StreamEvent::Done { exit_code: None };
        assert_eq!(ev.to_frame(), json!({"done": true}));
    }

    #[test]
    fn done_with_exit_code() {
        let ev = StreamEvent::Done { exit_code: Some(0) };
        assert_eq!(ev.to_frame(), json!({"done": true, "exit_code": 0}));
    }

    #[test]
    fn error_frame() {
        let ev = StreamEvent::error("boom");
        assert_eq!(ev.to_frame(), json!({"error": "boom"}));
    }

    #[test]
    fn content_kind_wraps() {
        assert_eq!(
            ContentKind::Output.wrap("x".into()),
            StreamEvent::Output {
                content: "x".into()
            }
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars(&"x".repeat(600), MAX_ERROR_DETAIL).len(), 500);
    }
}
