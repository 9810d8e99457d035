//! Canned commands: the quick-action shortcuts and the barcode scan tag.

use stock_types::{Result, StockError};

/// Prefix the backend recognises for scanned barcodes
pub const SCAN_PREFIX: &str = "scan:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuickAction {
    LowStock {
        location_id: i64,
    },
    Transfer {
        product: String,
        quantity: u32,
        from_location: i64,
        to_location: i64,
    },
    Scan {
        code: String,
    },
}

impl QuickAction {
    /// The shortcuts offered by default
    pub fn defaults() -> Vec<QuickAction> {
        vec![
            QuickAction::LowStock { location_id: 103 },
            QuickAction::Transfer {
                product: "bread".to_string(),
                quantity: 2,
                from_location: 101,
                to_location: 103,
            },
        ]
    }

    pub fn label(&self) -> &str {
        match self {
            QuickAction::LowStock { .. } => "Low Stock",
            QuickAction::Transfer { .. } => "Transfer",
            QuickAction::Scan { .. } => "Scan",
        }
    }

    /// Text submitted to the assistant for this action
    pub fn utterance(&self) -> Result<String> {
        match self {
            QuickAction::LowStock { location_id } => {
                Ok(format!("show low stock for store {}", location_id))
            }
            QuickAction::Transfer {
                product,
                quantity,
                from_location,
                to_location,
            } => Ok(format!(
                "transfer {} {} from store {} to {}",
                quantity, product, from_location, to_location
            )),
            QuickAction::Scan { code } => scan_command(code),
        }
    }
}

/// Tag a scanned code for submission, `scan:<code>`
pub fn scan_command(code: &str) -> Result<String> {
    let code = code.trim();
    if code.is_empty() {
        return Err(StockError::InvalidInput("scanned code is empty".to_string()));
    }
    Ok(format!("{}{}", SCAN_PREFIX, code))
}
