use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Store-wide inventory totals from `GET /stock/overview`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StockOverview {
    pub total_items: u64,
    pub total_quantity: u64,
    #[serde(rename = "low_stock")]
    pub low_stock_count: u64,
    #[serde(rename = "expiring")]
    pub expiring_count: u64,
}

/// One product line at a location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockItem {
    #[serde(rename = "storeId", default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<i64>,
    pub product: String,
    pub quantity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(rename = "uom", default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<String>,
}

impl StockItem {
    /// Expiry date, when present and in `YYYY-MM-DD` form
    pub fn expiry(&self) -> Option<NaiveDate> {
        let raw = self.expiry_date.as_deref()?.trim();
        // Some feeds send full timestamps; the date part is enough here.
        let date = raw.get(..10).unwrap_or(raw);
        NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
    }
}

/// Stock for a single location from `GET /stock/store/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationStock {
    #[serde(rename = "store_id")]
    pub location_id: i64,
    #[serde(default)]
    pub items: Vec<StockItem>,
}

impl LocationStock {
    pub fn total_quantity(&self) -> i64 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    /// Items whose expiry falls within `days` of `today` (already expired included)
    pub fn expiring_within(&self, days: i64, today: NaiveDate) -> Vec<&StockItem> {
        self.items
            .iter()
            .filter(|item| {
                item.expiry()
                    .map(|d| (d - today).num_days() <= days)
                    .unwrap_or(false)
            })
            .collect()
    }
}
