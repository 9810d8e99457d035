use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Result, StockError};

/// Marker that starts every meaningful line of the live feed
pub const LIVE_PAYLOAD_PREFIX: &str = "data:";

/// An inventory change notification from `GET /stock/live`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LiveUpdateEvent {
    /// Location the change applies to. `None` means refresh the overview only.
    pub location_id: Option<i64>,
}

impl LiveUpdateEvent {
    pub fn for_location(location_id: i64) -> Self {
        Self {
            location_id: Some(location_id),
        }
    }

    /// Parse one line of the live feed.
    ///
    /// Returns `Ok(None)` for lines that do not carry the payload prefix and
    /// `Err(Parse)` when the payload after the prefix is not a JSON object.
    pub fn parse_line(line: &str) -> Result<Option<Self>> {
        let Some(payload) = line.strip_prefix(LIVE_PAYLOAD_PREFIX) else {
            return Ok(None);
        };
        let payload = payload.trim();
        let value: Value = serde_json::from_str(payload)?;
        let Value::Object(obj) = value else {
            return Err(StockError::Parse(format!(
                "live payload is not a JSON object: {}",
                payload
            )));
        };
        Ok(Some(Self {
            location_id: obj.get("store_id").and_then(lenient_i64),
        }))
    }

    /// Render as a feed line, `data:{"store_id":103}`
    pub fn to_line(&self) -> String {
        let mut obj = Map::new();
        if let Some(id) = self.location_id {
            obj.insert("store_id".to_string(), Value::from(id));
        }
        format!("{}{}", LIVE_PAYLOAD_PREFIX, Value::Object(obj))
    }
}

/// Numbers and numeric strings are ids; anything else is treated as absent.
fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Events emitted by the session.
/// Observers drain these to react without polling the stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// A user entry was appended
    UserEntry { index: usize, text: String },
    /// A response cycle started
    TurnStart { turn_id: u64 },
    /// An empty assistant entry was opened for an incoming reply
    AssistantOpened { index: usize },
    /// Text was appended to the open assistant entry
    Fragment { index: usize, delta: String },
    /// An assistant entry will receive no more text
    AssistantFinalized { index: usize, text: String },
    /// The response cycle ended, successfully or not
    TurnEnd { turn_id: u64 },
    /// The "typing" flag changed
    Composing(bool),
    /// The overview snapshot was replaced
    OverviewUpdated,
    /// The location snapshot was replaced
    LocationStockUpdated { location_id: i64 },
    /// The selected location changed
    LocationSelected { location_id: i64 },
    /// The live feed connection opened
    LiveConnected,
    /// A valid live update arrived
    LiveUpdate { location_id: Option<i64> },
    /// The live feed connection ended
    LiveDisconnected { reason: String },
    /// A recoverable error occurred
    Error { message: String },
}
