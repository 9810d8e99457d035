//! Session controller tests against in-memory backends.
//!
//! Chat and live streams are fed through channels so each test decides
//! exactly when bytes arrive, when a connection drops and which of two
//! racing responses lands first.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stock_core::actions::QuickAction;
use stock_core::chat::TurnOutcome;
use stock_core::event_bus::EventBus;
use stock_core::ports::*;
use stock_core::session::SessionController;
use stock_types::config::{ChatMode, RetryConfig, SessionConfig};
use stock_types::event::{LiveUpdateEvent, SessionEvent};
use stock_types::message::*;
use stock_types::stock::*;
use stock_types::{Result, StockError};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

// ─── Mock backends ───────────────────────────────────────

type ChunkSender = mpsc::UnboundedSender<Result<Vec<u8>>>;

fn channel_stream() -> (ChunkSender, ByteStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    (tx, Box::pin(stream))
}

#[derive(Default)]
struct MockChat {
    streams: Mutex<VecDeque<ByteStream>>,
    reply: Mutex<Option<String>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockChat {
    /// Queue a response stream and return the handle that feeds it
    fn push_stream(&self) -> ChunkSender {
        let (tx, stream) = channel_stream();
        self.streams.lock().unwrap().push_back(stream);
        tx
    }

    fn messages(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|r| r.message.clone()).collect()
    }
}

#[async_trait]
impl ChatPort for MockChat {
    async fn chat_once(&self, req: &ChatRequest) -> Result<String> {
        self.requests.lock().unwrap().push(req.clone());
        self.reply
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| StockError::Transport("no reply scripted".to_string()))
    }

    async fn stream_chat(&self, req: &ChatRequest) -> Result<ByteStream> {
        self.requests.lock().unwrap().push(req.clone());
        match self.streams.lock().unwrap().pop_front() {
            Some(stream) => Ok(stream),
            None => Ok(Box::pin(futures::stream::iter(vec![Ok(b"ok".to_vec())]))),
        }
    }
}

#[derive(Default)]
struct MockStock {
    overview_calls: AtomicUsize,
    overview_fails: Mutex<bool>,
    location_calls: Mutex<Vec<i64>>,
    gates: Mutex<HashMap<i64, oneshot::Receiver<LocationStock>>>,
    live_feeds: Mutex<VecDeque<Result<ByteStream>>>,
    live_opens: Mutex<Vec<Instant>>,
}

impl MockStock {
    /// Hold the next response for `location_id` until the sender fires
    fn gate(&self, location_id: i64) -> oneshot::Sender<LocationStock> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().insert(location_id, rx);
        tx
    }

    fn push_live(&self) -> ChunkSender {
        let (tx, stream) = channel_stream();
        self.live_feeds.lock().unwrap().push_back(Ok(stream));
        tx
    }

    fn location_calls(&self) -> Vec<i64> {
        self.location_calls.lock().unwrap().clone()
    }

    fn live_opens(&self) -> Vec<Instant> {
        self.live_opens.lock().unwrap().clone()
    }
}

fn stock_for(location_id: i64) -> LocationStock {
    LocationStock {
        location_id,
        items: vec![StockItem {
            location_id: Some(location_id),
            product: "bread".to_string(),
            quantity: location_id % 10,
            category: Some("bakery".to_string()),
            unit: Some("loaf".to_string()),
            price: Some(2.5),
            expiry_date: None,
        }],
    }
}

#[async_trait]
impl StockPort for MockStock {
    async fn fetch_overview(&self) -> Result<StockOverview> {
        let n = self.overview_calls.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        if *self.overview_fails.lock().unwrap() {
            return Err(StockError::Transport("connection refused".to_string()));
        }
        Ok(StockOverview {
            total_items: n,
            total_quantity: 100,
            low_stock_count: 2,
            expiring_count: 1,
        })
    }

    async fn fetch_location_stock(&self, location_id: i64) -> Result<LocationStock> {
        self.location_calls.lock().unwrap().push(location_id);
        let gate = self.gates.lock().unwrap().remove(&location_id);
        match gate {
            Some(rx) => rx
                .await
                .map_err(|_| StockError::Transport("gate dropped".to_string())),
            None => Ok(stock_for(location_id)),
        }
    }

    async fn open_live(&self) -> Result<ByteStream> {
        self.live_opens.lock().unwrap().push(Instant::now());
        match self.live_feeds.lock().unwrap().pop_front() {
            Some(feed) => feed,
            None => Ok(Box::pin(futures::stream::pending())),
        }
    }
}

fn controller_with(
    config: SessionConfig,
) -> (SessionController, Arc<MockChat>, Arc<MockStock>) {
    let chat = Arc::new(MockChat::default());
    let stock = Arc::new(MockStock::default());
    let controller = SessionController::new(config, chat.clone(), stock.clone()).unwrap();
    (controller, chat, stock)
}

fn controller() -> (SessionController, Arc<MockChat>, Arc<MockStock>) {
    let mut config = SessionConfig::new("http://192.168.1.20:8000");
    config.session_id = "android-demo".to_string();
    controller_with(config)
}

/// Drain events until one matches, failing after five seconds.
async fn wait_for(bus: &EventBus, matches: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(event) = bus.drain().into_iter().find(|e| matches(e)) {
                return event;
            }
            bus.wait().await;
        }
    })
    .await;
    found.expect("timed out waiting for session event")
}

fn chunk(text: &str) -> Result<Vec<u8>> {
    Ok(text.as_bytes().to_vec())
}

// ─── Construction ────────────────────────────────────────

#[test]
fn new_rejects_invalid_config() {
    let chat = Arc::new(MockChat::default());
    let stock = Arc::new(MockStock::default());
    let result = SessionController::new(SessionConfig::new(""), chat, stock);
    assert!(matches!(result, Err(StockError::Config(_))));
}

// ─── User turns ──────────────────────────────────────────

#[tokio::test]
async fn submit_streams_reply_after_user_entry() {
    let (controller, chat, _) = controller();
    let tx = chat.push_stream();
    tx.send(chunk("Hel")).unwrap();
    tx.send(chunk("lo")).unwrap();
    drop(tx);

    let outcome = controller.submit("  hi  ").await.unwrap();
    assert_eq!(outcome, TurnOutcome::Completed);

    let snap = controller.transcript();
    assert_eq!(snap.entries(), &[
        TranscriptEntry::user("hi"),
        TranscriptEntry::assistant("Hello"),
    ]);
    assert!(!snap.composing);
    assert_eq!(chat.requests.lock().unwrap()[0], ChatRequest::new("hi", "android-demo"));
}

#[tokio::test]
async fn submit_blank_is_rejected() {
    let (controller, chat, _) = controller();
    assert!(matches!(controller.submit("   ").await, Err(StockError::InvalidInput(_))));
    assert!(controller.transcript().is_empty());
    assert!(chat.messages().is_empty());
}

#[tokio::test]
async fn overlapping_submit_is_rejected() {
    let (controller, chat, _) = controller();
    let tx = chat.push_stream();
    controller.submit_in_background("first").unwrap();

    assert_eq!(
        controller.submit("second").await,
        Err(StockError::ConcurrentRequestRejected)
    );
    assert!(matches!(
        controller.submit_in_background("third"),
        Err(StockError::ConcurrentRequestRejected)
    ));

    tx.send(chunk("done")).unwrap();
    drop(tx);
    wait_for(controller.event_bus(), |e| matches!(e, SessionEvent::TurnEnd { .. })).await;

    let snap = controller.transcript();
    assert_eq!(snap.entries(), &[
        TranscriptEntry::user("first"),
        TranscriptEntry::assistant("done"),
    ]);
    assert_eq!(chat.messages(), vec!["first".to_string()]);

    // The slot is free again.
    assert_eq!(controller.submit("again").await.unwrap(), TurnOutcome::Completed);
}

#[tokio::test]
async fn background_submit_is_observable_through_events() {
    let (controller, chat, _) = controller();
    let tx = chat.push_stream();
    controller.submit_in_background("bread?").unwrap();
    assert_eq!(controller.transcript().entries(), &[TranscriptEntry::user("bread?")]);

    wait_for(controller.event_bus(), |e| *e == SessionEvent::Composing(true)).await;
    tx.send(chunk("4 loaves")).unwrap();
    let event = wait_for(controller.event_bus(), |e| {
        matches!(e, SessionEvent::Fragment { .. })
    })
    .await;
    assert_eq!(event, SessionEvent::Fragment {
        index: 1,
        delta: "4 loaves".to_string(),
    });
    drop(tx);
    wait_for(controller.event_bus(), |e| *e == SessionEvent::Composing(false)).await;
}

#[tokio::test]
async fn stop_mid_stream_releases_composing() {
    let (controller, chat, _) = controller();
    let tx = chat.push_stream();
    controller.submit_in_background("hi").unwrap();
    tx.send(chunk("Hel")).unwrap();
    wait_for(controller.event_bus(), |e| matches!(e, SessionEvent::Fragment { .. })).await;

    controller.stop().await;

    let snap = controller.transcript();
    assert!(!snap.composing);
    assert_eq!(snap.open_index, None);
    assert_eq!(snap.last(), Some(&TranscriptEntry::assistant("Hel")));
    assert_eq!(controller.submit("more").await, Err(StockError::SessionClosed));
    // Bytes arriving after stop go nowhere.
    let _ = tx.send(chunk("lo"));
    assert_eq!(controller.transcript(), snap);
}

#[tokio::test]
async fn stop_cancels_waiting_submit() {
    let (controller, chat, _) = controller();
    let tx = chat.push_stream();
    tx.send(chunk("partial")).unwrap();

    let (outcome, _) = tokio::join!(controller.submit("hi"), async {
        wait_for(controller.event_bus(), |e| matches!(e, SessionEvent::Fragment { .. })).await;
        controller.stop().await;
    });

    assert_eq!(outcome, Err(StockError::Cancelled));
    assert!(!controller.is_composing());
    assert_eq!(controller.transcript().last(), Some(&TranscriptEntry::assistant("partial")));
}

#[tokio::test]
async fn mid_stream_drop_keeps_partial_reply() {
    let (controller, chat, _) = controller();
    let tx = chat.push_stream();
    tx.send(chunk("Bread: ")).unwrap();
    tx.send(Err(StockError::Transport("connection reset".to_string()))).unwrap();

    assert_eq!(controller.submit("bread?").await.unwrap(), TurnOutcome::Interrupted);
    let text = controller.transcript().entries()[1].text.clone();
    assert!(text.starts_with("Bread: "));
    assert!(text.contains("Connection to stock server lost"));
    assert!(!controller.is_composing());
}

#[tokio::test]
async fn once_mode_appends_parsed_reply() {
    let mut config = SessionConfig::new("http://localhost:8000");
    config.chat_mode = ChatMode::Once;
    let (controller, chat, _) = controller_with(config);
    *chat.reply.lock().unwrap() = Some(r#"{"reply":"4 loaves at store 101"}"#.to_string());

    assert_eq!(controller.submit("bread?").await.unwrap(), TurnOutcome::Completed);
    assert_eq!(controller.transcript().entries(), &[
        TranscriptEntry::user("bread?"),
        TranscriptEntry::assistant("4 loaves at store 101"),
    ]);
}

#[tokio::test]
async fn scan_and_quick_actions_submit_canned_text() {
    let (controller, chat, _) = controller();
    controller.submit_scan("8901234567890").await.unwrap();
    controller
        .submit_action(&QuickAction::LowStock { location_id: 103 })
        .await
        .unwrap();
    assert_eq!(chat.messages(), vec![
        "scan:8901234567890".to_string(),
        "show low stock for store 103".to_string(),
    ]);
    assert!(matches!(controller.submit_scan(" ").await, Err(StockError::InvalidInput(_))));
}

// ─── Reference data ──────────────────────────────────────

#[tokio::test]
async fn start_loads_overview_and_default_location() {
    let (controller, _, stock) = controller();
    controller.start().await.unwrap();

    let cache = controller.cache();
    assert!(cache.overview.is_some());
    assert_eq!(cache.selected_location_id, Some(101));
    assert_eq!(cache.location_stock, Some(stock_for(101)));
    wait_for(controller.event_bus(), |e| *e == SessionEvent::LiveConnected).await;

    // A second start is a no-op.
    controller.start().await.unwrap();
    assert_eq!(stock.overview_calls.load(Ordering::SeqCst), 1);

    controller.stop().await;
    assert_eq!(controller.start().await, Err(StockError::SessionClosed));
    assert_eq!(controller.refresh().await, Err(StockError::SessionClosed));
}

#[tokio::test]
async fn start_survives_failed_pulls() {
    let (controller, _, stock) = controller();
    *stock.overview_fails.lock().unwrap() = true;

    controller.start().await.unwrap();
    let event = wait_for(controller.event_bus(), |e| matches!(e, SessionEvent::Error { .. })).await;
    let SessionEvent::Error { message } = event else { unreachable!() };
    assert!(message.contains("overview"));
    assert!(controller.cache().overview.is_none());
    assert_eq!(controller.cache().location_stock, Some(stock_for(101)));
    controller.stop().await;
}

#[tokio::test]
async fn stop_unblocks_start_waiting_on_stalled_pull() {
    let (controller, _, stock) = controller();
    let _held = stock.gate(101);

    let (started, _) = tokio::time::timeout(
        Duration::from_secs(5),
        async {
            tokio::join!(controller.start(), async {
                tokio::task::yield_now().await;
                controller.stop().await;
            })
        },
    )
    .await
    .expect("start() should end once the session stops");

    assert_eq!(started, Err(StockError::Cancelled));
    assert_eq!(stock.live_opens().len(), 0);
}

#[tokio::test]
async fn stop_unblocks_switch_location() {
    let (controller, _, stock) = controller();
    controller.switch_location(101).await.unwrap();
    let _held_switch = stock.gate(102);

    let (switched, _) = tokio::time::timeout(
        Duration::from_secs(5),
        async {
            tokio::join!(controller.switch_location(102), async {
                tokio::task::yield_now().await;
                controller.stop().await;
            })
        },
    )
    .await
    .expect("switch_location() should end once the session stops");

    assert_eq!(switched, Err(StockError::Cancelled));
    assert_eq!(controller.cache().location_stock, Some(stock_for(101)));
    assert_eq!(controller.refresh().await, Err(StockError::SessionClosed));
}

#[tokio::test]
async fn stop_unblocks_refresh_waiting_on_stalled_pull() {
    let (controller, _, stock) = controller();
    controller.switch_location(103).await.unwrap();
    let _held = stock.gate(103);

    let (refreshed, _) = tokio::time::timeout(
        Duration::from_secs(5),
        async {
            tokio::join!(controller.refresh(), async {
                tokio::task::yield_now().await;
                controller.stop().await;
            })
        },
    )
    .await
    .expect("refresh() should end once the session stops");

    assert_eq!(refreshed, Err(StockError::Cancelled));
}

#[tokio::test]
async fn last_response_wins() {
    let (controller, _, stock) = controller();
    let release_101 = stock.gate(101);
    let release_102 = stock.gate(102);

    let (first, second, _) = tokio::join!(
        controller.switch_location(101),
        controller.switch_location(102),
        async {
            release_102.send(stock_for(102)).unwrap();
            while controller.cache().location_stock.map(|s| s.location_id) != Some(102) {
                tokio::task::yield_now().await;
            }
            release_101.send(stock_for(101)).unwrap();
        }
    );
    assert_eq!(first.unwrap(), stock_for(101));
    assert_eq!(second.unwrap(), stock_for(102));

    let cache = controller.cache();
    assert_eq!(cache.location_stock, Some(stock_for(101)));
    assert_eq!(cache.selected_location_id, Some(101));
}

#[tokio::test]
async fn refresh_pulls_selected_location() {
    let (controller, _, stock) = controller();
    controller.switch_location(102).await.unwrap();
    controller.refresh().await.unwrap();
    assert_eq!(stock.location_calls(), vec![102, 102]);
    assert_eq!(stock.overview_calls.load(Ordering::SeqCst), 1);
}

// ─── Live updates ────────────────────────────────────────

#[tokio::test]
async fn live_update_refreshes_only_matching_location() {
    let (controller, _, stock) = controller();
    let feed = stock.push_live();
    controller.start().await.unwrap();
    controller.switch_location(103).await.unwrap();
    wait_for(controller.event_bus(), |e| *e == SessionEvent::LiveConnected).await;
    let overview_before = stock.overview_calls.load(Ordering::SeqCst);

    feed.send(chunk(&format!("{}\n", LiveUpdateEvent::for_location(103).to_line())))
        .unwrap();
    wait_for(controller.event_bus(), |e| {
        *e == SessionEvent::LocationStockUpdated { location_id: 103 }
    })
    .await;
    assert_eq!(stock.location_calls(), vec![101, 103, 103]);

    feed.send(chunk("data:{\"store_id\":101}\n")).unwrap();
    wait_for(controller.event_bus(), |e| *e == SessionEvent::OverviewUpdated).await;

    assert_eq!(stock.overview_calls.load(Ordering::SeqCst), overview_before + 2);
    assert_eq!(stock.location_calls(), vec![101, 103, 103]);
    assert_eq!(controller.cache().selected_location_id, Some(103));
    controller.stop().await;
}

#[tokio::test]
async fn live_feed_survives_garbage_lines() {
    let (controller, _, stock) = controller();
    let feed = stock.push_live();
    controller.start().await.unwrap();

    feed.send(chunk("data:not json\n: keep-alive\n\ndata:{}\n")).unwrap();
    wait_for(controller.event_bus(), |e| {
        *e == SessionEvent::LiveUpdate { location_id: None }
    })
    .await;
    assert_eq!(controller.live().skipped_lines(), 1);
    assert_eq!(controller.live().events_handled(), 1);
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn live_feed_reconnects_after_close() {
    let (controller, _, stock) = controller();
    let first = stock.push_live();
    controller.start().await.unwrap();
    wait_for(controller.event_bus(), |e| *e == SessionEvent::LiveConnected).await;

    drop(first);
    wait_for(controller.event_bus(), |e| {
        matches!(e, SessionEvent::LiveDisconnected { .. })
    })
    .await;
    wait_for(controller.event_bus(), |e| *e == SessionEvent::LiveConnected).await;
    assert_eq!(controller.live().connections_opened(), 2);
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn live_supervisor_backs_off_then_gives_up() {
    let mut config = SessionConfig::new("http://localhost:8000");
    config.live_retry = RetryConfig {
        initial_backoff_ms: 1_000,
        max_backoff_ms: 30_000,
        max_attempts: Some(3),
    };
    let (controller, _, stock) = controller_with(config);
    for _ in 0..3 {
        stock
            .live_feeds
            .lock()
            .unwrap()
            .push_back(Err(StockError::Transport("connection refused".to_string())));
    }

    controller.start().await.unwrap();
    let event = wait_for(controller.event_bus(), |e| {
        matches!(e, SessionEvent::Error { message } if message.starts_with("Live updates stopped"))
    })
    .await;
    assert!(matches!(event, SessionEvent::Error { .. }));

    let opens = stock.live_opens();
    assert_eq!(opens.len(), 3);
    assert!(opens[1] - opens[0] >= Duration::from_millis(1_000));
    assert!(opens[2] - opens[1] >= Duration::from_millis(2_000));
    assert_eq!(controller.live().connections_opened(), 0);
    controller.stop().await;
}
