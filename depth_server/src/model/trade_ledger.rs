//! In-memory trade history.
//!
//! The ledger keeps trades in the order they were recorded and serves the
//! retrieval side of the trade history (`all`, `recent`). It is bounded: once
//! `capacity` is exceeded the oldest trades are dropped from the working set.
//! Durable storage is handled separately by `persistence`.

use depth_common::Result;
use depth_common::market::Trade;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Default number of trades kept in memory.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Ordered, bounded, thread-safe list of executed trades.
pub struct TradeLedger {
    trades: Mutex<VecDeque<Trade>>,
    capacity: usize,
}

impl TradeLedger {
    /// Creates an empty ledger holding at most `capacity` trades (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            trades: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Seeds the ledger with trades loaded from durable storage.
    pub fn initialize(&self, prior: Vec<Trade>) -> Result<()> {
        let mut trades = self.trades.lock()?;
        trades.extend(prior);
        Self::trim(&mut trades, self.capacity);
        Ok(())
    }

    /// Appends one executed trade.
    pub fn record(&self, trade: Trade) -> Result<()> {
        let mut trades = self.trades.lock()?;
        trades.push_back(trade);
        Self::trim(&mut trades, self.capacity);
        Ok(())
    }

    /// Every trade in the working set, oldest first.
    pub fn all(&self) -> Result<Vec<Trade>> {
        Ok(self.trades.lock()?.iter().cloned().collect())
    }

    /// The last `count` trades, oldest first. Returns everything when the
    /// ledger holds `count` trades or fewer.
    pub fn recent(&self, count: usize) -> Result<Vec<Trade>> {
        let trades = self.trades.lock()?;
        let skip = trades.len().saturating_sub(count);
        Ok(trades.iter().skip(skip).cloned().collect())
    }

    /// Number of trades in the working set.
    pub fn len(&self) -> Result<usize> {
        Ok(self.trades.lock()?.len())
    }

    fn trim(trades: &mut VecDeque<Trade>, capacity: usize) {
        while trades.len() > capacity {
            trades.pop_front();
        }
    }
}

impl Default for TradeLedger {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
