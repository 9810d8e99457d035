//! Chat stream client — one request/response cycle per user turn.
//!
//! A turn is claimed with [`ChatStreamClient::try_begin`]; the returned
//! [`TurnGuard`] closes the assistant entry, clears the composing flag and
//! releases the turn when dropped. That covers clean ends, transport failures
//! and a cancelled future alike, so the "typing" state cannot get stuck.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use stock_types::{
    event::SessionEvent,
    message::{parse_reply_body, ChatRequest},
    Result, StockError,
};

use crate::codec::Utf8StreamDecoder;
use crate::event_bus::EventBus;
use crate::ports::ChatPort;
use crate::transcript::TranscriptStore;

/// How a turn ended. Transport problems are reported in the transcript,
/// this is only informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The response arrived in full
    Completed,
    /// No response byte was received
    Unreachable,
    /// The connection failed after part of the response arrived
    Interrupted,
}

pub struct ChatStreamClient {
    chat: Arc<dyn ChatPort>,
    transcript: Arc<TranscriptStore>,
    event_bus: EventBus,
    session_id: String,
    connect_timeout: Duration,
    active: Arc<AtomicBool>,
    turn_counter: AtomicU64,
}

impl ChatStreamClient {
    pub fn new(
        chat: Arc<dyn ChatPort>,
        transcript: Arc<TranscriptStore>,
        event_bus: EventBus,
        session_id: impl Into<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            chat,
            transcript,
            event_bus,
            session_id: session_id.into(),
            connect_timeout,
            active: Arc::new(AtomicBool::new(false)),
            turn_counter: AtomicU64::new(0),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Claim the session's single turn slot.
    pub fn try_begin(&self) -> Result<TurnGuard> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StockError::ConcurrentRequestRejected);
        }
        let turn_id = self.turn_counter.fetch_add(1, Ordering::Relaxed) + 1;
        self.event_bus.emit(SessionEvent::TurnStart { turn_id });
        Ok(TurnGuard {
            turn_id,
            active: self.active.clone(),
            transcript: self.transcript.clone(),
            event_bus: self.event_bus.clone(),
        })
    }

    /// Stream one response into the transcript.
    pub async fn run(&self, text: &str) -> Result<TurnOutcome> {
        let guard = self.try_begin()?;
        Ok(self.stream_turn(guard, text).await)
    }

    /// Non-streaming fallback: one complete reply, one assistant entry.
    pub async fn run_once(&self, text: &str) -> Result<TurnOutcome> {
        let guard = self.try_begin()?;
        Ok(self.once_turn(guard, text).await)
    }

    /// Streaming body of a turn already claimed with `try_begin`.
    pub async fn stream_turn(&self, guard: TurnGuard, text: &str) -> TurnOutcome {
        self.transcript.set_composing(true);
        self.transcript.begin_assistant_entry();

        let req = ChatRequest::new(text, &self.session_id);
        let opened = tokio::time::timeout(self.connect_timeout, self.chat.stream_chat(&req)).await;
        let mut stream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return self.unreachable(guard, &e),
            Err(_) => {
                let e = StockError::Timeout(self.connect_timeout.as_millis() as u64);
                return self.unreachable(guard, &e);
            }
        };

        let mut decoder = Utf8StreamDecoder::new();
        let mut received_any = false;

        // No per-chunk timeout: long pauses are normal while the model generates.
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    if bytes.is_empty() {
                        continue;
                    }
                    received_any = true;
                    self.transcript.append_fragment(&decoder.push(&bytes));
                }
                Err(e) if !received_any => return self.unreachable(guard, &e),
                Err(e) => {
                    log::warn!("Turn {}: stream interrupted: {}", guard.turn_id, e);
                    self.transcript.append_fragment(&decoder.finish());
                    self.transcript.append_fragment(&interrupted_message(&e));
                    return TurnOutcome::Interrupted;
                }
            }
        }

        self.transcript.append_fragment(&decoder.finish());
        log::debug!("Turn {}: stream complete", guard.turn_id);
        TurnOutcome::Completed
    }

    /// Non-streaming body of a turn already claimed with `try_begin`.
    pub async fn once_turn(&self, guard: TurnGuard, text: &str) -> TurnOutcome {
        self.transcript.set_composing(true);

        let req = ChatRequest::new(text, &self.session_id);
        let outcome = match self.chat.chat_once(&req).await {
            Ok(raw) => {
                self.transcript.append_assistant(&parse_reply_body(&raw));
                TurnOutcome::Completed
            }
            Err(e) => {
                log::warn!("Turn {}: chat request failed: {}", guard.turn_id, e);
                self.transcript.append_assistant(&format!("Error: {}", e));
                TurnOutcome::Unreachable
            }
        };
        drop(guard);
        outcome
    }

    fn unreachable(&self, guard: TurnGuard, e: &StockError) -> TurnOutcome {
        log::warn!("Turn {}: could not reach server: {}", guard.turn_id, e);
        self.transcript.append_fragment(&unreachable_message(e));
        TurnOutcome::Unreachable
    }
}

/// Held for the duration of one turn.
pub struct TurnGuard {
    turn_id: u64,
    active: Arc<AtomicBool>,
    transcript: Arc<TranscriptStore>,
    event_bus: EventBus,
}

impl TurnGuard {
    pub fn turn_id(&self) -> u64 {
        self.turn_id
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.transcript.finish_assistant_entry();
        self.transcript.set_composing(false);
        self.event_bus.emit(SessionEvent::TurnEnd {
            turn_id: self.turn_id,
        });
        self.active.store(false, Ordering::Release);
    }
}

pub fn unreachable_message(e: &StockError) -> String {
    format!(
        "⚠️ Could not reach stock server ({}). \
         Check that this device and the server are on the same network.",
        e
    )
}

pub fn interrupted_message(e: &StockError) -> String {
    format!(
        "\n⚠️ Connection to stock server lost ({}). The reply above may be incomplete.",
        e
    )
}
