use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Who wrote a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    User,
    Assistant,
}

/// A single entry in the conversation transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub author: Author,
    pub text: String,
}

impl TranscriptEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            author: Author::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            author: Author::Assistant,
            text: text.into(),
        }
    }

    pub fn is_assistant(&self) -> bool {
        self.author == Author::Assistant
    }

    /// Copy of this entry with `delta` appended. Entries are never edited in place.
    pub fn extended(&self, delta: &str) -> Self {
        let mut text = String::with_capacity(self.text.len() + delta.len());
        text.push_str(&self.text);
        text.push_str(delta);
        Self {
            author: self.author,
            text,
        }
    }
}

/// Immutable view of the transcript at one point in time.
///
/// The entry list is shared with the store until the store's next write,
/// which copies it first, so a snapshot never changes under its reader.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TranscriptSnapshot {
    pub entries: Arc<Vec<TranscriptEntry>>,
    /// The assistant is composing a reply ("typing" indicator)
    pub composing: bool,
    /// Index of the assistant entry still being extended, if any
    pub open_index: Option<usize>,
}

impl TranscriptSnapshot {
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    pub fn is_open(&self, index: usize) -> bool {
        self.open_index == Some(index)
    }
}

/// Body of `POST /chat` and `POST /chat_stream`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: String,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: session_id.into(),
        }
    }
}

const EMPTY_REPLY: &str = "...";

/// Extract the reply text from a `POST /chat` body.
///
/// A JSON object yields its `reply` string (or "..." when missing).
/// Anything that is not JSON is shown as-is, blank bodies as "...".
pub fn parse_reply_body(raw: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(obj)) => obj
            .get("reply")
            .and_then(|v| v.as_str())
            .unwrap_or(EMPTY_REPLY)
            .to_string(),
        _ if raw.trim().is_empty() => EMPTY_REPLY.to_string(),
        _ => raw.to_string(),
    }
}
