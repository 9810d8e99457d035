//! Command line flags and session configuration loading.

use std::path::PathBuf;

use clap::Parser;
use stock_types::{
    config::{ChatMode, SessionConfig},
    Result, StockError,
};

/// Terminal client for the stock assistant backend
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Backend address, e.g. http://192.168.1.20:8000
    #[arg(short, long)]
    pub base_url: Option<String>,

    /// JSON file with a full session configuration; flags override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Conversation id sent with every chat request
    #[arg(long)]
    pub session_id: Option<String>,

    /// Store shown on start
    #[arg(short, long)]
    pub location: Option<i64>,

    /// Use the non-streaming chat endpoint
    #[arg(long)]
    pub once: bool,

    /// Echo finished replies on stderr for a speech engine to read out
    #[arg(long)]
    pub speak: bool,
}

impl Cli {
    pub fn session_config(&self) -> Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => {
                let base_url = self.base_url.clone().ok_or_else(|| {
                    StockError::Config("--base-url or --config is required".to_string())
                })?;
                SessionConfig::new(base_url)
            }
        };
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(session_id) = &self.session_id {
            config.session_id = session_id.clone();
        }
        if let Some(location) = self.location {
            config.default_location_id = location;
        }
        if self.once {
            config.chat_mode = ChatMode::Once;
        }
        config.validate()?;
        Ok(config)
    }
}

fn load_config(path: &PathBuf) -> Result<SessionConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| StockError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    serde_json::from_str(&raw)
        .map_err(|e| StockError::Config(format!("invalid config {}: {}", path.display(), e)))
}
