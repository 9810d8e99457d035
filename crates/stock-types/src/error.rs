use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StockError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("A response is already in progress for this session")]
    ConcurrentRequestRejected,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Cancelled")]
    Cancelled,
}

impl StockError {
    /// Connect, read and write failures on any channel, including timeouts.
    pub fn is_transport(&self) -> bool {
        matches!(self, StockError::Transport(_) | StockError::Timeout(_))
    }
}

impl From<serde_json::Error> for StockError {
    fn from(e: serde_json::Error) -> Self {
        StockError::Parse(e.to_string())
    }
}
