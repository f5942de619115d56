//! Session protocol shared by client and server.
//!
//! Both directions are line-delimited JSON: one object per `\n`-terminated line.
//! Viewers send `ClientCommand`s (tagged by `method`), the server answers with
//! `ServerEvent`s (tagged by `event`). The method and event names are part of
//! the wire contract and must not be renamed.
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::FeedError;
use crate::market::{DepthEntry, PanelId, PrintEntry, TradeSide};
use crate::tickers::Ticker;

/// Command sent by a viewer over its session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum ClientCommand {
    /// Start streaming depth for `ticker` into panel `panel_id`.
    Subscribe {
        /// Viewer-chosen panel identifier.
        panel_id: PanelId,
        /// Ticker whose depth the panel shows.
        ticker: Ticker,
    },
    /// Stop streaming depth into `panel_id`.
    Unsubscribe {
        /// Panel to close.
        panel_id: PanelId,
    },
    /// Buy order, filled immediately at `price`.
    PlaceBuyOrder {
        /// Ticker to trade.
        ticker: Ticker,
        /// Execution price.
        price: Decimal,
        /// Executed quantity.
        quantity: u32,
        /// Panel the order was placed from, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        panel_id: Option<PanelId>,
    },
    /// Sell order, filled immediately at `price`.
    PlaceSellOrder {
        /// Ticker to trade.
        ticker: Ticker,
        /// Execution price.
        price: Decimal,
        /// Executed quantity.
        quantity: u32,
        /// Panel the order was placed from, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        panel_id: Option<PanelId>,
    },
}

impl ClientCommand {
    /// Creates a buy or sell order command for `side`.
    pub fn order(side: TradeSide, ticker: Ticker, price: Decimal, quantity: u32) -> Self {
        match side {
            TradeSide::Buy => ClientCommand::PlaceBuyOrder {
                ticker,
                price,
                quantity,
                panel_id: None,
            },
            TradeSide::Sell => ClientCommand::PlaceSellOrder {
                ticker,
                price,
                quantity,
                panel_id: None,
            },
        }
    }

    /// Encode as one JSON line, newline included.
    pub fn to_json_line(&self) -> Result<Vec<u8>, FeedError> {
        encode_line(self)
    }

    /// Decode a single JSON line (trailing whitespace is ignored).
    pub fn from_json_line(line: &str) -> Result<Self, FeedError> {
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

/// Event pushed by the server to a viewer.
///
/// Payload slices are reference counted so one generated snapshot can be
/// queued to many connections without copying it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerEvent {
    /// Depth snapshot for one panel: 10 asks followed by 10 bids.
    ReceiveDepth {
        /// Panel the snapshot is addressed to.
        panel_id: PanelId,
        /// Snapshot levels.
        entries: Arc<[DepthEntry]>,
    },
    /// Trade prints. `key` is the ticker for live prints and the panel id for
    /// the backlog sent when a viewer opens its first panel.
    ReceivePrint {
        /// Ticker or panel id, see above.
        key: String,
        /// Prints in chronological order.
        prints: Arc<[PrintEntry]>,
    },
}

impl ServerEvent {
    /// Encode as one JSON line, newline included.
    pub fn to_json_line(&self) -> Result<Vec<u8>, FeedError> {
        encode_line(self)
    }

    /// Decode a single JSON line (trailing whitespace is ignored).
    pub fn from_json_line(line: &str) -> Result<Self, FeedError> {
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

fn encode_line<T: Serialize>(value: &T) -> Result<Vec<u8>, FeedError> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}
