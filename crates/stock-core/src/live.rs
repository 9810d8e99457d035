//! Live update subscriber — one read loop over the `/stock/live` push feed.
//!
//! Lines carrying the `data:` prefix become [`LiveUpdateEvent`]s, which
//! trigger cache refreshes, each bounded by the read timeout. A bad line is
//! skipped and counted; the loop only ends when the connection fails, times
//! out, closes, or is cancelled.
//! Restarting is the caller's job.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use stock_types::{
    event::{LiveUpdateEvent, SessionEvent},
    Result, StockError,
};
use tokio_util::sync::CancellationToken;

use crate::cache::ReferenceCache;
use crate::codec::LineDecoder;
use crate::event_bus::EventBus;
use crate::ports::StockPort;

pub struct LiveUpdateSubscriber {
    stock: Arc<dyn StockPort>,
    cache: Arc<ReferenceCache>,
    event_bus: EventBus,
    connect_timeout: Duration,
    read_timeout: Duration,
    connections_opened: AtomicU64,
    events_handled: AtomicU64,
    skipped_lines: AtomicU64,
}

impl LiveUpdateSubscriber {
    pub fn new(
        stock: Arc<dyn StockPort>,
        cache: Arc<ReferenceCache>,
        event_bus: EventBus,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Self {
        Self {
            stock,
            cache,
            event_bus,
            connect_timeout,
            read_timeout,
            connections_opened: AtomicU64::new(0),
            events_handled: AtomicU64::new(0),
            skipped_lines: AtomicU64::new(0),
        }
    }

    pub fn connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::Relaxed)
    }

    pub fn events_handled(&self) -> u64 {
        self.events_handled.load(Ordering::Relaxed)
    }

    /// Payload lines that failed to parse
    pub fn skipped_lines(&self) -> u64 {
        self.skipped_lines.load(Ordering::Relaxed)
    }

    /// Connect and process the feed until it fails or `cancel` fires.
    ///
    /// Returns `Ok(())` only when cancelled; every other exit is an error
    /// the caller may retry.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        let opened = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            opened = tokio::time::timeout(self.connect_timeout, self.stock.open_live()) => opened,
        };
        let mut stream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(self.disconnected(e)),
            Err(_) => return Err(self.disconnected(StockError::Timeout(millis(self.connect_timeout)))),
        };

        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        self.event_bus.emit(SessionEvent::LiveConnected);
        log::info!("Live update feed connected");

        let mut lines = LineDecoder::new();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    self.event_bus.emit(SessionEvent::LiveDisconnected {
                        reason: "stopped".to_string(),
                    });
                    return Ok(());
                }
                next = tokio::time::timeout(self.read_timeout, stream.next()) => next,
            };

            match next {
                Ok(Some(Ok(bytes))) => {
                    for line in lines.push(&bytes) {
                        self.handle_line(&line, cancel).await;
                    }
                }
                Ok(Some(Err(e))) => return Err(self.disconnected(e)),
                Ok(None) => {
                    if let Some(line) = lines.finish() {
                        self.handle_line(&line, cancel).await;
                    }
                    let e = StockError::Transport("live feed closed by server".to_string());
                    return Err(self.disconnected(e));
                }
                Err(_) => {
                    return Err(self.disconnected(StockError::Timeout(millis(self.read_timeout))));
                }
            }
        }
    }

    async fn handle_line(&self, line: &str, cancel: &CancellationToken) {
        match LiveUpdateEvent::parse_line(line) {
            Ok(Some(event)) => {
                // A stalled refresh must not hold up the feed.
                let refreshed = tokio::select! {
                    _ = cancel.cancelled() => return,
                    refreshed = tokio::time::timeout(self.read_timeout, self.handle_event(event)) => refreshed,
                };
                if refreshed.is_err() {
                    let e = StockError::Timeout(millis(self.read_timeout));
                    log::warn!("Live refresh abandoned: {}", e);
                    self.event_bus.emit(SessionEvent::Error {
                        message: format!("Live refresh failed: {}", e),
                    });
                }
            }
            Ok(None) => {}
            Err(e) => {
                let skipped = self.skipped_lines.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!("Skipping live update line ({} skipped so far): {}", skipped, e);
            }
        }
    }

    /// Refresh the overview, and the selected location when the event names it.
    pub async fn handle_event(&self, event: LiveUpdateEvent) {
        self.events_handled.fetch_add(1, Ordering::Relaxed);
        self.event_bus.emit(SessionEvent::LiveUpdate {
            location_id: event.location_id,
        });

        let selected = self.cache.selected_location_id();
        let location = event.location_id.filter(|id| Some(*id) == selected);

        let overview = self.cache.pull_overview();
        let stock = async {
            match location {
                Some(id) => self.cache.pull_location_stock(id).await.map(|_| ()),
                None => Ok(()),
            }
        };
        let (overview, stock) = futures::join!(overview, stock);

        for e in [overview.err(), stock.err()].into_iter().flatten() {
            self.event_bus.emit(SessionEvent::Error {
                message: format!("Live refresh failed: {}", e),
            });
        }
    }

    fn disconnected(&self, e: StockError) -> StockError {
        log::warn!("Live update feed disconnected: {}", e);
        self.event_bus.emit(SessionEvent::LiveDisconnected {
            reason: e.to_string(),
        });
        e
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}
