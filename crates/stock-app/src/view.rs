//! Console projection of the session, updated by draining the event bus.
//!
//! Streamed fragments are written inline as they arrive. Status lines that
//! show up mid-reply are held back until the reply is finalized so the two
//! never interleave.

use std::io::{self, Write};

use stock_core::cache::CacheSnapshot;
use stock_types::{
    event::SessionEvent,
    stock::{LocationStock, StockOverview},
};

const ASSISTANT_PREFIX: &str = "assistant: ";

#[derive(Debug, Default)]
pub struct ConsoleView {
    /// Transcript index of the entry currently printing inline
    streaming_index: Option<usize>,
    deferred: Vec<String>,
}

impl ConsoleView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render a batch of events to terminal text.
    pub fn process_events(&mut self, events: Vec<SessionEvent>, cache: &CacheSnapshot) -> String {
        let mut out = String::new();
        for event in events {
            match event {
                SessionEvent::Fragment { index, delta } => {
                    if self.streaming_index != Some(index) {
                        if self.streaming_index.is_some() {
                            out.push('\n');
                        }
                        out.push_str(ASSISTANT_PREFIX);
                        self.streaming_index = Some(index);
                    }
                    out.push_str(&delta);
                }
                SessionEvent::AssistantFinalized { index, text } => {
                    if self.streaming_index == Some(index) {
                        out.push('\n');
                    } else if !text.is_empty() {
                        out.push_str(ASSISTANT_PREFIX);
                        out.push_str(&text);
                        out.push('\n');
                    }
                    self.streaming_index = None;
                    for line in self.deferred.drain(..) {
                        out.push_str(&line);
                        out.push('\n');
                    }
                }
                SessionEvent::OverviewUpdated => {
                    if let Some(overview) = &cache.overview {
                        self.status(&mut out, describe_overview(overview));
                    }
                }
                SessionEvent::LocationStockUpdated { location_id } => {
                    if let Some(stock) = cache
                        .location_stock
                        .as_ref()
                        .filter(|s| s.location_id == location_id)
                    {
                        self.status(&mut out, describe_location(stock));
                    }
                }
                SessionEvent::LocationSelected { location_id } => {
                    self.status(&mut out, format!("[store {}] selected", location_id));
                }
                SessionEvent::LiveConnected => {
                    self.status(&mut out, "[live] connected".to_string());
                }
                SessionEvent::LiveDisconnected { reason } => {
                    self.status(&mut out, format!("[live] disconnected: {}", reason));
                }
                SessionEvent::LiveUpdate { location_id } => {
                    log::debug!("Live update for {:?}", location_id);
                }
                SessionEvent::Error { message } => {
                    self.status(&mut out, format!("[error] {}", message));
                }
                SessionEvent::UserEntry { .. }
                | SessionEvent::AssistantOpened { .. }
                | SessionEvent::Composing(_)
                | SessionEvent::TurnStart { .. }
                | SessionEvent::TurnEnd { .. } => {}
            }
        }
        out
    }

    fn status(&mut self, out: &mut String, line: String) {
        if self.streaming_index.is_some() {
            self.deferred.push(line);
        } else {
            out.push_str(&line);
            out.push('\n');
        }
    }
}

/// Write one rendered frame and flush it.
pub fn write_frame<W: Write>(w: &mut W, frame: &str) -> io::Result<()> {
    w.write_all(frame.as_bytes())?;
    w.flush()
}

pub fn describe_overview(overview: &StockOverview) -> String {
    format!(
        "[overview] {} products, {} units, {} low, {} expiring",
        overview.total_items,
        overview.total_quantity,
        overview.low_stock_count,
        overview.expiring_count
    )
}

pub fn describe_location(stock: &LocationStock) -> String {
    format!(
        "[store {}] {} products, {} units",
        stock.location_id,
        stock.items.len(),
        stock.total_quantity()
    )
}

/// Multi-line summary for `/status`
pub fn describe_cache(cache: &CacheSnapshot) -> String {
    let mut lines = Vec::new();
    match &cache.overview {
        Some(overview) => lines.push(describe_overview(overview)),
        None => lines.push("[overview] not loaded".to_string()),
    }
    if let Some(at) = cache.overview_refreshed_at {
        lines.push(format!("  refreshed {}", at.format("%H:%M:%S")));
    }
    match &cache.location_stock {
        Some(stock) => {
            lines.push(describe_location(stock));
            for item in &stock.items {
                lines.push(format!(
                    "  {:<20} {:>6} {}",
                    item.product,
                    item.quantity,
                    item.unit.as_deref().unwrap_or("")
                ));
            }
        }
        None => lines.push("[store] not loaded".to_string()),
    }
    if let Some(selected) = cache.selected_location_id {
        lines.push(format!("selected store: {}", selected));
    }
    lines.join("\n")
}
