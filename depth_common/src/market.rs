//! Market payloads exchanged between server and viewers.
//!
//! - `DepthEntry`: one price level of a depth snapshot.
//! - `Trade`: the canonical execution record kept in the trade history.
//! - `PrintEntry`: a trade re-shaped for display in a viewer's print list.
//!
//! Prices are exact decimals (serialized as strings) so a level price and the
//! tick size it was built from always agree.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{Display, EnumString};

use crate::tickers::Ticker;

/// Side of a depth level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(ascii_case_insensitive)]
#[allow(missing_docs)]
pub enum BookSide {
    Bid,
    Ask,
}

/// Aggressor side of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(ascii_case_insensitive)]
#[allow(missing_docs)]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Identifier of one viewer-side depth panel.
#[derive(Debug, Clone, Serialize, Deserialize, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[serde(transparent)]
pub struct PanelId(String);

impl PanelId {
    /// Wraps an identifier chosen by the viewer.
    pub fn new(id: impl Into<String>) -> Self {
        PanelId(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One level of a depth snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct DepthEntry {
    pub side: BookSide,
    pub price: Decimal,
    pub size: u32,
    /// Distance from the snapshot's mid price, in percent (2 dp).
    pub percent_change: Decimal,
}

/// Executed trade as stored in the history.
///
/// Synthetic prints and orders placed by viewers produce the same record;
/// `origin_panel` is set only when a viewer attached its panel to the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct Trade {
    pub time: DateTime<Utc>,
    pub side: TradeSide,
    pub ticker: Ticker,
    pub price: Decimal,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_panel: Option<PanelId>,
}

impl Trade {
    /// Reshape into the display form pushed to print listeners.
    pub fn to_print_entry(&self) -> PrintEntry {
        PrintEntry {
            time: self.time,
            side: self.side,
            ticker: self.ticker.clone(),
            price: self.price,
            quantity: self.quantity,
        }
    }
}

/// A trade as shown in a viewer's print list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct PrintEntry {
    pub time: DateTime<Utc>,
    pub side: TradeSide,
    pub ticker: Ticker,
    pub price: Decimal,
    pub quantity: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_side_parsing_is_case_insensitive() {
        assert_eq!(TradeSide::from_str("buy").unwrap(), TradeSide::Buy);
        assert_eq!(TradeSide::from_str("SELL").unwrap(), TradeSide::Sell);
        assert_eq!(BookSide::Ask.to_string(), "Ask");
    }

    #[test]
    fn test_trade_json_omits_missing_origin_panel() {
        let trade = Trade {
            time: Utc::now(),
            side: TradeSide::Buy,
            ticker: Ticker::new("AAPL").unwrap(),
            price: Decimal::new(17500, 2),
            quantity: 10,
            origin_panel: None,
        };
        let json = serde_json::to_string(&trade).unwrap();
        assert!(!json.contains("origin_panel"));
        assert!(json.contains("\"price\":\"175.00\""));

        let print = trade.to_print_entry();
        assert_eq!(print.price, trade.price);
        assert_eq!(print.ticker, trade.ticker);
    }
}
