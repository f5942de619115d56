//! Trade history persistence service.
//!
//! `TradeHistoryStore` ties the in-memory `TradeLedger` to a `TradeStorage`:
//!
//! - `start` loads the stored history into the ledger, subscribes a trade
//!   listener to the registry and spawns an appender thread that writes every
//!   new trade to storage in arrival order;
//! - `stop` unsubscribes, lets the appender drain its queue, then overwrites
//!   storage with the last [`SAVED_TRADES`] trades so the file stays bounded.
//!
//! Storage failures are logged and never reach the fan-out path: a trade that
//! cannot be appended is still in the ledger and still broadcast.

use crossbeam_channel::{Receiver, unbounded};
use depth_common::Result;
use depth_common::market::Trade;
use log::{error, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::model::trade_ledger::TradeLedger;
use crate::registry::{ListenerId, SubscriptionRegistry};
use crate::storage::TradeStorage;

/// Number of trades written back on shutdown.
pub const SAVED_TRADES: usize = 100;

/// Persistence service for the trade history.
pub struct TradeHistoryStore<S: TradeStorage + 'static> {
    storage: Arc<S>,
    registry: Arc<SubscriptionRegistry>,
    ledger: Arc<TradeLedger>,
    listener: Option<ListenerId>,
    appender: Option<JoinHandle<()>>,
}

impl<S: TradeStorage + 'static> TradeHistoryStore<S> {
    /// Creates a stopped service writing into `storage`.
    pub fn new(storage: Arc<S>, registry: Arc<SubscriptionRegistry>) -> Self {
        let ledger = Arc::clone(registry.ledger());
        Self {
            storage,
            registry,
            ledger,
            listener: None,
            appender: None,
        }
    }

    /// Loads stored trades into the ledger and starts appending new ones.
    ///
    /// An unreadable history is logged and the service starts empty.
    pub fn start(&mut self) -> Result<()> {
        match self.storage.load_all() {
            Ok(prior) => {
                info!("Loaded {} trades from storage", prior.len());
                self.ledger.initialize(prior)?;
            }
            Err(e) => warn!("Trade history not loaded, starting empty: {}", e),
        }

        let (tx, rx) = unbounded::<Trade>();
        let storage = Arc::clone(&self.storage);
        self.appender = Some(
            thread::Builder::new()
                .name("trade-appender".to_string())
                .spawn(move || append_loop(storage.as_ref(), rx))?,
        );
        self.listener = Some(self.registry.subscribe_trade(tx)?);
        Ok(())
    }

    /// Stops appending and saves the last [`SAVED_TRADES`] trades.
    pub fn stop(&mut self) -> Result<()> {
        if let Some(id) = self.listener.take() {
            self.registry.unsubscribe_trade(id)?;
        }
        if let Some(appender) = self.appender.take() {
            if appender.join().is_err() {
                error!("Trade appender panicked");
            }
        }
        let recent = self.ledger.recent(SAVED_TRADES)?;
        match self.storage.overwrite_with_lines(&recent) {
            Ok(()) => info!("Saved {} trades", recent.len()),
            Err(e) => error!("Failed to save trade history: {}", e),
        }
        Ok(())
    }
}

/// Drains `rx` until every sender is gone, appending each trade.
fn append_loop<S: TradeStorage + ?Sized>(storage: &S, rx: Receiver<Trade>) {
    for trade in rx {
        if let Err(e) = storage.append_lines(std::slice::from_ref(&trade)) {
            warn!("Failed to append trade for {}: {}", trade.ticker, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::trade_ledger::tests::numbered_trade;
    use crate::storage::FileTradeStorage;
    use depth_common::FeedError;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn registry() -> Arc<SubscriptionRegistry> {
        Arc::new(SubscriptionRegistry::new(Arc::new(TradeLedger::default())))
    }

    #[test]
    fn test_restart_reproduces_recent_tail() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("trade_history.jsonl");

        let first = registry();
        let mut store = TradeHistoryStore::new(Arc::new(FileTradeStorage::new(&path)), Arc::clone(&first));
        store.start().unwrap();
        for n in 1..=150 {
            first.dispatch_trade(numbered_trade(n)).unwrap();
        }
        let tail = first.ledger().recent(100).unwrap();
        store.stop().unwrap();

        let second = registry();
        let mut store = TradeHistoryStore::new(Arc::new(FileTradeStorage::new(&path)), Arc::clone(&second));
        store.start().unwrap();
        assert_eq!(second.ledger().recent(100).unwrap(), tail);
        assert_eq!(second.ledger().len().unwrap(), 100);
        store.stop().unwrap();
    }

    #[test]
    fn test_appender_writes_every_trade_before_stop() {
        let tmp = TempDir::new().unwrap();
        let storage = Arc::new(FileTradeStorage::new(tmp.path().join("h.jsonl")));
        let registry = registry();
        let mut store = TradeHistoryStore::new(Arc::clone(&storage), Arc::clone(&registry));
        store.start().unwrap();
        for n in 1..=5 {
            registry.dispatch_trade(numbered_trade(n)).unwrap();
        }
        store.stop().unwrap();
        let quantities: Vec<u32> = storage.load_all().unwrap().iter().map(|t| t.quantity).collect();
        assert_eq!(quantities, vec![1, 2, 3, 4, 5]);
    }

    /// Storage whose writes always fail.
    struct BrokenStorage {
        attempts: Mutex<usize>,
    }

    impl TradeStorage for BrokenStorage {
        fn load_all(&self) -> Result<Vec<Trade>> {
            Err(FeedError::Format("disk unavailable".to_string()))
        }

        fn append_lines(&self, _trades: &[Trade]) -> Result<()> {
            *self.attempts.lock()? += 1;
            Err(FeedError::Format("disk unavailable".to_string()))
        }

        fn overwrite_with_lines(&self, _trades: &[Trade]) -> Result<()> {
            Err(FeedError::Format("disk unavailable".to_string()))
        }
    }

    #[test]
    fn test_storage_failures_do_not_stop_the_pipeline() {
        let storage = Arc::new(BrokenStorage {
            attempts: Mutex::new(0),
        });
        let registry = registry();
        let (print_tx, print_rx) = unbounded();
        registry.subscribe_print(print_tx).unwrap();

        let mut store = TradeHistoryStore::new(Arc::clone(&storage), Arc::clone(&registry));
        store.start().unwrap();
        registry.dispatch_trade(numbered_trade(1)).unwrap();
        registry.dispatch_trade(numbered_trade(2)).unwrap();
        store.stop().unwrap();

        assert_eq!(print_rx.try_iter().count(), 2);
        assert_eq!(registry.ledger().len().unwrap(), 2);
        assert_eq!(*storage.attempts.lock().unwrap(), 2);
    }
}
