//! Port traits — the network boundary.
//!
//! The engine only talks to the backend through these traits.
//! The HTTP implementation lives in `stock-platform`; tests supply mocks.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use stock_types::{
    message::ChatRequest,
    stock::{LocationStock, StockOverview},
    Result,
};

/// Raw response body chunks, in arrival order
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

// ─── Chat Port ───────────────────────────────────────────────

#[async_trait]
pub trait ChatPort: Send + Sync {
    /// `POST /chat` — the complete raw response body
    async fn chat_once(&self, req: &ChatRequest) -> Result<String>;

    /// `POST /chat_stream` — resolves once the response has started,
    /// then yields body chunks until the server closes the connection
    async fn stream_chat(&self, req: &ChatRequest) -> Result<ByteStream>;
}

// ─── Stock Port ──────────────────────────────────────────────

#[async_trait]
pub trait StockPort: Send + Sync {
    /// `GET /stock/overview`
    async fn fetch_overview(&self) -> Result<StockOverview>;

    /// `GET /stock/store/{id}`
    async fn fetch_location_stock(&self, location_id: i64) -> Result<LocationStock>;

    /// `GET /stock/live` — the push feed as raw bytes
    async fn open_live(&self) -> Result<ByteStream>;
}
