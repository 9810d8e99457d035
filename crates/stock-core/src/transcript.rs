//! Transcript store — the ordered conversation plus the "composing" flag.
//!
//! Entries live in an `Arc<Vec<_>>`. Writers go through `Arc::make_mut`, so a
//! snapshot handed out earlier keeps the old list and the store copies before
//! writing. Each operation holds the lock for one short, non-awaiting section,
//! which makes every mutation a single atomic replace as seen by readers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use stock_types::{
    event::SessionEvent,
    message::{TranscriptEntry, TranscriptSnapshot},
    Result, StockError,
};

use crate::event_bus::EventBus;

pub struct TranscriptStore {
    state: Mutex<TranscriptSnapshot>,
    event_bus: EventBus,
}

impl TranscriptStore {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            state: Mutex::new(TranscriptSnapshot::default()),
            event_bus,
        }
    }

    /// Append a user entry. Blank text is rejected without touching state.
    /// Returns the new transcript length.
    pub fn append_user(&self, text: &str) -> Result<usize> {
        if text.trim().is_empty() {
            return Err(StockError::InvalidInput(
                "message must not be blank".to_string(),
            ));
        }
        let (index, len) = {
            let mut state = self.lock();
            Arc::make_mut(&mut state.entries).push(TranscriptEntry::user(text));
            (state.entries.len() - 1, state.entries.len())
        };
        self.event_bus.emit(SessionEvent::UserEntry {
            index,
            text: text.to_string(),
        });
        Ok(len)
    }

    /// Append the empty placeholder the next response streams into.
    pub fn begin_assistant_entry(&self) -> usize {
        let index = {
            let mut state = self.lock();
            let entries = Arc::make_mut(&mut state.entries);
            entries.push(TranscriptEntry::assistant(""));
            let index = entries.len() - 1;
            state.open_index = Some(index);
            index
        };
        self.event_bus.emit(SessionEvent::AssistantOpened { index });
        index
    }

    /// Extend the open assistant entry, or start a new one if the last entry
    /// is not open. Empty deltas are ignored.
    pub fn append_fragment(&self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        let index = {
            let mut state = self.lock();
            let last = state.entries.len().checked_sub(1);
            match last.filter(|&i| state.open_index == Some(i)) {
                Some(i) => {
                    let entries = Arc::make_mut(&mut state.entries);
                    entries[i] = entries[i].extended(delta);
                    i
                }
                None => {
                    let entries = Arc::make_mut(&mut state.entries);
                    entries.push(TranscriptEntry::assistant(delta));
                    let i = entries.len() - 1;
                    state.open_index = Some(i);
                    i
                }
            }
        };
        self.event_bus.emit(SessionEvent::Fragment {
            index,
            delta: delta.to_string(),
        });
    }

    /// Append a complete assistant entry that takes no further fragments.
    pub fn append_assistant(&self, text: &str) -> usize {
        let index = {
            let mut state = self.lock();
            state.open_index = None;
            let entries = Arc::make_mut(&mut state.entries);
            entries.push(TranscriptEntry::assistant(text));
            entries.len() - 1
        };
        self.event_bus.emit(SessionEvent::AssistantFinalized {
            index,
            text: text.to_string(),
        });
        index
    }

    /// Close the open assistant entry. Returns it, or `None` if nothing was open.
    pub fn finish_assistant_entry(&self) -> Option<(usize, TranscriptEntry)> {
        let finished = {
            let mut state = self.lock();
            let index = state.open_index.take()?;
            state.entries.get(index).cloned().map(|e| (index, e))
        };
        if let Some((index, entry)) = &finished {
            self.event_bus.emit(SessionEvent::AssistantFinalized {
                index: *index,
                text: entry.text.clone(),
            });
        }
        finished
    }

    pub fn set_composing(&self, composing: bool) {
        let changed = {
            let mut state = self.lock();
            std::mem::replace(&mut state.composing, composing) != composing
        };
        if changed {
            self.event_bus.emit(SessionEvent::Composing(composing));
        }
    }

    pub fn is_composing(&self) -> bool {
        self.lock().composing
    }

    /// Consistent copy of entries, composing flag and open index.
    pub fn snapshot(&self) -> TranscriptSnapshot {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, TranscriptSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
