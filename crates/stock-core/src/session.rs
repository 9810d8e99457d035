//! Session controller — the façade the UI, voice input and scanner talk to.
//!
//! Owns the transcript, the reference cache, the chat client and the live
//! feed. User turns are serialised by the chat client; the live feed runs in
//! its own task under a supervisor that restarts it with backoff. `stop()`
//! cancels everything through one `CancellationToken`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use stock_types::{
    config::{ChatMode, RetryConfig, SessionConfig},
    event::SessionEvent,
    message::TranscriptSnapshot,
    stock::LocationStock,
    Result, StockError,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::actions::{scan_command, QuickAction};
use crate::cache::{CacheSnapshot, ReferenceCache};
use crate::chat::{ChatStreamClient, TurnGuard, TurnOutcome};
use crate::event_bus::EventBus;
use crate::live::LiveUpdateSubscriber;
use crate::ports::{ChatPort, StockPort};
use crate::transcript::TranscriptStore;

pub struct SessionController {
    config: SessionConfig,
    event_bus: EventBus,
    transcript: Arc<TranscriptStore>,
    cache: Arc<ReferenceCache>,
    chat: Arc<ChatStreamClient>,
    live: Arc<LiveUpdateSubscriber>,
    cancel: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        chat_port: Arc<dyn ChatPort>,
        stock_port: Arc<dyn StockPort>,
    ) -> Result<Self> {
        config.validate()?;

        let event_bus = EventBus::new();
        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
        let transcript = Arc::new(TranscriptStore::new(event_bus.clone()));
        let cache = Arc::new(ReferenceCache::new(stock_port.clone(), event_bus.clone()));
        let chat = Arc::new(ChatStreamClient::new(
            chat_port,
            transcript.clone(),
            event_bus.clone(),
            config.session_id.clone(),
            connect_timeout,
        ));
        let live = Arc::new(LiveUpdateSubscriber::new(
            stock_port,
            cache.clone(),
            event_bus.clone(),
            connect_timeout,
            Duration::from_millis(config.live_read_timeout_ms),
        ));

        Ok(Self {
            config,
            event_bus,
            transcript,
            cache,
            chat,
            live,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn transcript(&self) -> TranscriptSnapshot {
        self.transcript.snapshot()
    }

    pub fn cache(&self) -> CacheSnapshot {
        self.cache.snapshot()
    }

    pub fn is_composing(&self) -> bool {
        self.transcript.is_composing()
    }

    pub fn live(&self) -> &LiveUpdateSubscriber {
        &self.live
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // ─── User turns ──────────────────────────────────────────

    /// Submit a user message and wait until the reply is complete.
    pub async fn submit(&self, text: &str) -> Result<TurnOutcome> {
        let (guard, text) = self.begin_turn(text)?;
        let chat = self.chat.clone();
        let mode = self.config.chat_mode;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(StockError::Cancelled),
            outcome = respond(chat, mode, guard, text) => Ok(outcome),
        }
    }

    /// Submit a user message and return as soon as it is in the transcript.
    /// The reply streams in from a background task; observe it through the
    /// event bus or `transcript()`. Must be called inside a tokio runtime.
    pub fn submit_in_background(&self, text: &str) -> Result<()> {
        let (guard, text) = self.begin_turn(text)?;
        let chat = self.chat.clone();
        let mode = self.config.chat_mode;
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                outcome = respond(chat, mode, guard, text) => {
                    log::debug!("Background turn finished: {:?}", outcome);
                }
            }
        });
        self.track(handle);
        Ok(())
    }

    /// Forward a scanned barcode as `scan:<code>`.
    pub async fn submit_scan(&self, code: &str) -> Result<TurnOutcome> {
        self.submit(&scan_command(code)?).await
    }

    pub async fn submit_action(&self, action: &QuickAction) -> Result<TurnOutcome> {
        self.submit(&action.utterance()?).await
    }

    /// Validate, claim the turn, then record the user entry. The entry is in
    /// the transcript before any reply fragment can be.
    fn begin_turn(&self, text: &str) -> Result<(TurnGuard, String)> {
        self.ensure_open()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(StockError::InvalidInput(
                "message must not be blank".to_string(),
            ));
        }
        let guard = self.chat.try_begin()?;
        self.transcript.append_user(text)?;
        Ok((guard, text.to_string()))
    }

    // ─── Reference data ──────────────────────────────────────

    pub async fn switch_location(&self, location_id: i64) -> Result<LocationStock> {
        self.ensure_open()?;
        self.until_stopped(self.cache.switch_location(location_id))
            .await
    }

    /// Re-pull the overview and the selected location.
    pub async fn refresh(&self) -> Result<()> {
        self.ensure_open()?;
        self.until_stopped(async {
            self.cache.pull_overview().await?;
            if let Some(id) = self.cache.selected_location_id() {
                self.cache.pull_location_stock(id).await?;
            }
            Ok::<(), StockError>(())
        })
        .await
    }

    // ─── Lifecycle ───────────────────────────────────────────

    /// Initial overview and default-location pulls, then the live feed.
    ///
    /// Pull failures are reported on the event bus and do not prevent the
    /// live feed from starting; its first update retries them. A `stop()`
    /// during the pulls ends `start()` with `Cancelled`.
    pub async fn start(&self) -> Result<()> {
        self.ensure_open()?;
        if self.started.swap(true, Ordering::AcqRel) {
            log::warn!("Session already started");
            return Ok(());
        }

        let location_id = self.config.default_location_id;
        let (overview, location) = self
            .until_stopped(async {
                Ok::<_, StockError>(futures::join!(
                    self.cache.pull_overview(),
                    self.cache.switch_location(location_id)
                ))
            })
            .await?;
        if let Err(e) = overview {
            self.report(format!("Could not load stock overview: {}", e));
        }
        if let Err(e) = location {
            self.report(format!("Could not load stock for store {}: {}", location_id, e));
        }

        let handle = tokio::spawn(supervise_live(
            self.live.clone(),
            self.config.live_retry.clone(),
            self.event_bus.clone(),
            self.cancel.clone(),
        ));
        self.track(handle);
        log::info!("Session {} started", self.config.session_id);
        Ok(())
    }

    /// Cancel the running turn and the live feed, and wait for their tasks.
    pub async fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.lock_tasks());
        for handle in handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    log::error!("Session task panicked: {}", e);
                }
            }
        }
        log::info!("Session {} stopped", self.config.session_id);
    }

    /// Run `fut` unless `stop()` fires first.
    async fn until_stopped<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(StockError::Cancelled),
            result = fut => result,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(StockError::SessionClosed);
        }
        Ok(())
    }

    fn report(&self, message: String) {
        log::warn!("{}", message);
        self.event_bus.emit(SessionEvent::Error { message });
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.lock_tasks();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        // Background tasks hold only clones; make sure they wind down.
        self.cancel.cancel();
    }
}

async fn respond(
    chat: Arc<ChatStreamClient>,
    mode: ChatMode,
    guard: TurnGuard,
    text: String,
) -> TurnOutcome {
    match mode {
        ChatMode::Streaming => chat.stream_turn(guard, &text).await,
        ChatMode::Once => chat.once_turn(guard, &text).await,
    }
}

/// Keep the live feed running, backing off between consecutive failures.
async fn supervise_live(
    live: Arc<LiveUpdateSubscriber>,
    retry: RetryConfig,
    event_bus: EventBus,
    cancel: CancellationToken,
) {
    let mut failures: u32 = 0;
    loop {
        let opened_before = live.connections_opened();
        let err = match live.run(&cancel).await {
            Ok(()) => break,
            Err(e) => e,
        };
        if cancel.is_cancelled() {
            break;
        }
        if live.connections_opened() > opened_before {
            failures = 0;
        }
        failures += 1;

        if retry.max_attempts.is_some_and(|max| failures >= max) {
            log::error!("Live update feed gave up after {} attempts: {}", failures, err);
            event_bus.emit(SessionEvent::Error {
                message: format!("Live updates stopped: {}", err),
            });
            break;
        }

        let delay = Duration::from_millis(retry.backoff_ms(failures));
        log::info!("Reconnecting live update feed in {:?}", delay);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
