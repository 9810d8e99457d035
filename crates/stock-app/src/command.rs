//! Parsing of terminal input lines.
//!
//! Plain text is a chat message. Lines starting with `/` are local commands
//! standing in for the app's buttons, store picker and barcode scanner.

use stock_core::actions::QuickAction;
use stock_types::{Result, StockError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    /// Switch the selected store
    Store(i64),
    /// Low-stock shortcut; `None` means the selected store
    LowStock(Option<i64>),
    Transfer(QuickAction),
    Scan(String),
    Refresh,
    Status,
    Mute,
    Help,
    Quit,
}

pub const HELP: &str = "\
Type a question and press Enter, or use:
  /store <id>                       switch the selected store
  /low [store]                      show low stock
  /transfer [qty product from to]   move stock between stores
  /scan <code>                      send a scanned barcode
  /refresh                          reload overview and store stock
  /status                           show cached stock and live feed counters
  /mute                             toggle spoken replies
  /quit";

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Say(line.to_string())));
    };

    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default().to_lowercase();
    let args: Vec<&str> = parts.collect();

    let command = match (name.as_str(), args.as_slice()) {
        ("store", [id]) => Command::Store(parse_id(id)?),
        ("low", []) => Command::LowStock(None),
        ("low", [id]) => Command::LowStock(Some(parse_id(id)?)),
        ("transfer", []) => default_transfer(),
        ("transfer", [quantity, product, from, to]) => Command::Transfer(QuickAction::Transfer {
            product: product.to_string(),
            quantity: quantity
                .parse()
                .map_err(|_| StockError::InvalidInput(format!("bad quantity: {}", quantity)))?,
            from_location: parse_id(from)?,
            to_location: parse_id(to)?,
        }),
        ("scan", [code]) => Command::Scan(code.to_string()),
        ("refresh", []) => Command::Refresh,
        ("status", []) => Command::Status,
        ("mute", []) => Command::Mute,
        ("help", []) => Command::Help,
        ("quit", []) | ("exit", []) => Command::Quit,
        _ => {
            return Err(StockError::InvalidInput(format!(
                "unknown command: {} (try /help)",
                line
            )))
        }
    };
    Ok(Some(command))
}

fn parse_id(raw: &str) -> Result<i64> {
    raw.parse()
        .map_err(|_| StockError::InvalidInput(format!("bad store id: {}", raw)))
}

fn default_transfer() -> Command {
    QuickAction::defaults()
        .into_iter()
        .find(|a| matches!(a, QuickAction::Transfer { .. }))
        .map(Command::Transfer)
        .unwrap_or(Command::Help)
}
