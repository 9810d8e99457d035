use serde::{Deserialize, Serialize};

use crate::{Result, StockError};

/// Session configuration.
///
/// There is no `Default`: the backend address must always be supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub base_url: String,
    #[serde(default = "new_session_id")]
    pub session_id: String,
    #[serde(default = "default_location_id")]
    pub default_location_id: i64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_live_read_timeout_ms")]
    pub live_read_timeout_ms: u64,
    /// Whole-request limit for the overview and store-stock pulls
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub chat_mode: ChatMode,
    #[serde(default)]
    pub live_retry: RetryConfig,
}

impl SessionConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            session_id: new_session_id(),
            default_location_id: default_location_id(),
            connect_timeout_ms: default_connect_timeout_ms(),
            live_read_timeout_ms: default_live_read_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            chat_mode: ChatMode::default(),
            live_retry: RetryConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.base_url.trim();
        if url.is_empty() {
            return Err(StockError::Config("base_url is required".to_string()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(StockError::Config(format!(
                "base_url must start with http:// or https://, got {}",
                url
            )));
        }
        if self.session_id.trim().is_empty() {
            return Err(StockError::Config("session_id must not be blank".to_string()));
        }
        if self.connect_timeout_ms == 0
            || self.live_read_timeout_ms == 0
            || self.request_timeout_ms == 0
        {
            return Err(StockError::Config("timeouts must be greater than zero".to_string()));
        }
        self.live_retry.validate()
    }

    /// Full URL for a backend path, e.g. `endpoint("/stock/overview")`
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Which chat endpoint user turns go through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    /// `POST /chat_stream`, fragments appended as they arrive
    #[default]
    Streaming,
    /// `POST /chat`, one complete reply
    Once,
}

/// Backoff policy for restarting the live feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Consecutive failures before giving up; `None` retries forever
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            max_attempts: None,
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<()> {
        if self.initial_backoff_ms == 0 || self.max_backoff_ms < self.initial_backoff_ms {
            return Err(StockError::Config(
                "live_retry needs 0 < initial_backoff_ms <= max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based), doubling up to the cap
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(32);
        self.initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms)
    }
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_location_id() -> i64 {
    101
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_live_read_timeout_ms() -> u64 {
    90_000
}

fn default_request_timeout_ms() -> u64 {
    15_000
}
