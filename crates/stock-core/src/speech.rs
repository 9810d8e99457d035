//! Tracks which assistant replies a speech-output engine has already read out.

use stock_types::message::{Author, TranscriptSnapshot};

/// Cursor over finalized assistant entries.
///
/// Entries still being streamed are held back until they are closed. User
/// entries are never returned.
#[derive(Debug, Default)]
pub struct SpeechCursor {
    next_index: usize,
    muted: bool,
}

impl SpeechCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// While muted, finalized replies are skipped rather than queued.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Text of every assistant entry finalized since the last call, oldest first.
    pub fn take_finalized(&mut self, snapshot: &TranscriptSnapshot) -> Vec<String> {
        let end = snapshot.open_index.unwrap_or(snapshot.len()).min(snapshot.len());
        if end <= self.next_index {
            return Vec::new();
        }
        let ready = snapshot.entries()[self.next_index..end]
            .iter()
            .filter(|e| e.author == Author::Assistant && !e.text.trim().is_empty())
            .map(|e| e.text.clone());
        let out = if self.muted { Vec::new() } else { ready.collect() };
        self.next_index = end;
        out
    }

    /// Only the newest finalized reply, dropping older unread ones.
    pub fn take_latest(&mut self, snapshot: &TranscriptSnapshot) -> Option<String> {
        self.take_finalized(snapshot).pop()
    }
}
