//! HTTP adapter for the stock assistant backend.
//!
//! One `reqwest::Client` serves every endpoint. Every request has a connect
//! timeout; the overview and store-stock pulls are also bounded as a whole.
//! Chat replies and the live feed stay open for as long as the server keeps
//! them open, and the engine applies its own read timeout to the live feed.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, Response};
use serde::de::DeserializeOwned;

use stock_core::ports::*;
use stock_types::{
    config::SessionConfig,
    message::ChatRequest,
    stock::{LocationStock, StockOverview},
    Result, StockError,
};

/// Talks to the backend's REST and streaming endpoints.
pub struct HttpBackend {
    client: reqwest::Client,
    config: SessionConfig,
}

impl HttpBackend {
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .map_err(|e| StockError::Config(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.config.endpoint(path);
        log::debug!("GET {}", url);
        let limit = Duration::from_millis(self.config.request_timeout_ms);
        let timed_out = |e: reqwest::Error| {
            if e.is_timeout() {
                StockError::Timeout(self.config.request_timeout_ms)
            } else {
                transport(e)
            }
        };
        let response = self
            .client
            .get(&url)
            .timeout(limit)
            .send()
            .await
            .map_err(timed_out)?;
        let body = checked(response).await?.text().await.map_err(timed_out)?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn post_chat(&self, path: &str, req: &ChatRequest) -> Result<Response> {
        let url = self.config.endpoint(path);
        log::debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(transport)?;
        checked(response).await
    }
}

#[async_trait]
impl ChatPort for HttpBackend {
    async fn chat_once(&self, req: &ChatRequest) -> Result<String> {
        self.post_chat("/chat", req)
            .await?
            .text()
            .await
            .map_err(transport)
    }

    async fn stream_chat(&self, req: &ChatRequest) -> Result<ByteStream> {
        let response = self.post_chat("/chat_stream", req).await?;
        Ok(body_stream(response))
    }
}

#[async_trait]
impl StockPort for HttpBackend {
    async fn fetch_overview(&self) -> Result<StockOverview> {
        self.get_json("/stock/overview").await
    }

    async fn fetch_location_stock(&self, location_id: i64) -> Result<LocationStock> {
        self.get_json(&format!("/stock/store/{}", location_id)).await
    }

    async fn open_live(&self) -> Result<ByteStream> {
        let url = self.config.endpoint("/stock/live");
        log::debug!("GET {} (live)", url);
        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(transport)?;
        Ok(body_stream(checked(response).await?))
    }
}

// ─── Helpers ─────────────────────────────────────────────────

/// Non-2xx responses become transport errors carrying status and body.
async fn checked(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    Err(StockError::Transport(format!("HTTP {}: {}", status, text.trim())))
}

fn body_stream(response: Response) -> ByteStream {
    Box::pin(
        response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(transport)),
    )
}

fn transport(e: reqwest::Error) -> StockError {
    StockError::Transport(e.to_string())
}
