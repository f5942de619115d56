//! Subscription bookkeeping and the trade pipeline.
//!
//! The `SubscriptionRegistry` knows which panel wants which ticker's depth and
//! who listens to trades:
//!
//! - Depth subscribers are keyed by panel. Each subscribed ticker owns a
//!   `TickerStream` (its private random source) that is created with the first
//!   panel and dropped with the last one, so idle tickers cost nothing.
//! - Print listeners receive every trade as a `ReceivePrint` event; trade
//!   listeners receive the raw `Trade` (the persistence appender is one).
//!
//! Listeners are `crossbeam_channel` senders. Delivering is a non-blocking send
//! into an unbounded queue, so a slow connection never stalls a tick; a send to
//! a dropped receiver is logged and skipped.
//!
//! Locking: subscribe/unsubscribe take the write side of an `RwLock`, ticks and
//! trade dispatch take the read side and deliver while holding it. A tick
//! therefore sees a subscriber set either entirely before or entirely after a
//! concurrent mutation, and once `unsubscribe_depth` returns no later tick can
//! reach that panel. Lock order is `depth` or `listeners`, then the ledger.

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use depth_common::Result;
use depth_common::command::ServerEvent;
use depth_common::market::{DepthEntry, PanelId, PrintEntry, Trade, TradeSide};
use depth_common::tickers::Ticker;
use log::{debug, info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::model::trade_ledger::TradeLedger;

/// Channel receiving `ReceiveDepth` events for one or more panels.
pub type DepthListener = Sender<ServerEvent>;
/// Channel receiving `ReceivePrint` events.
pub type PrintListener = Sender<ServerEvent>;
/// Channel receiving raw trades.
pub type TradeListener = Sender<Trade>;

/// Handle returned by the global subscribe calls, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Per-ticker random source plus the last mid price drawn from it.
pub struct TickerStream {
    /// Random source owned by this ticker alone.
    pub rng: StdRng,
    /// Mid price of the latest depth snapshot, if any.
    pub last_mid: Option<Decimal>,
}

impl TickerStream {
    /// Seeded from the symbol, so a ticker replays the same sequence every
    /// time it is (re)subscribed and never shares state with another ticker.
    fn seeded(ticker: &Ticker) -> Self {
        let mut hasher = DefaultHasher::new();
        ticker.hash(&mut hasher);
        Self {
            rng: StdRng::seed_from_u64(hasher.finish()),
            last_mid: None,
        }
    }
}

/// One ticker with at least one panel, as seen by a generator tick.
pub struct ActiveTicker<'a> {
    /// The ticker being visited.
    pub ticker: &'a Ticker,
    /// Its random stream, locked for the duration of the visit.
    pub stream: &'a mut TickerStream,
    panels: &'a HashMap<PanelId, DepthListener>,
}

impl ActiveTicker<'_> {
    /// Number of panels subscribed to this ticker.
    pub fn panel_count(&self) -> usize {
        self.panels.len()
    }

    /// Sends the same snapshot to every panel of the ticker. Returns the
    /// number of successful deliveries.
    pub fn deliver_depth(&self, entries: &Arc<[DepthEntry]>) -> usize {
        let mut delivered = 0;
        for (panel_id, listener) in self.panels {
            let event = ServerEvent::ReceiveDepth {
                panel_id: panel_id.clone(),
                entries: Arc::clone(entries),
            };
            match listener.send(event) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(
                    "Depth for {} not delivered to panel {}: connection closed",
                    self.ticker, panel_id
                ),
            }
        }
        delivered
    }
}

struct TickerFeed {
    panels: HashMap<PanelId, DepthListener>,
    stream: Mutex<TickerStream>,
}

#[derive(Default)]
struct DepthBook {
    panel_tickers: HashMap<PanelId, Ticker>,
    feeds: HashMap<Ticker, TickerFeed>,
}

impl DepthBook {
    /// Removes `panel_id` from `ticker`'s feed and releases the feed when it
    /// becomes empty.
    fn detach(&mut self, ticker: &Ticker, panel_id: &PanelId) -> bool {
        let Some(feed) = self.feeds.get_mut(ticker) else {
            return false;
        };
        let removed = feed.panels.remove(panel_id).is_some();
        if feed.panels.is_empty() {
            self.feeds.remove(ticker);
            debug!("Released stream for {}", ticker);
        }
        removed
    }
}

#[derive(Default)]
struct Listeners {
    prints: Vec<(ListenerId, PrintListener)>,
    trades: Vec<(ListenerId, TradeListener)>,
}

/// Shared subscription state. Construct one per process and hand it around in
/// an `Arc`.
pub struct SubscriptionRegistry {
    depth: RwLock<DepthBook>,
    listeners: RwLock<Listeners>,
    ledger: Arc<TradeLedger>,
    next_listener: AtomicU64,
}

impl SubscriptionRegistry {
    /// Creates a registry whose trade pipeline ends in `ledger`.
    pub fn new(ledger: Arc<TradeLedger>) -> Self {
        Self {
            depth: RwLock::new(DepthBook::default()),
            listeners: RwLock::new(Listeners::default()),
            ledger,
            next_listener: AtomicU64::new(1),
        }
    }

    /// The ledger every dispatched trade is recorded into.
    pub fn ledger(&self) -> &Arc<TradeLedger> {
        &self.ledger
    }

    /// Routes depth for `ticker` to `panel_id`. Re-subscribing a panel
    /// replaces its previous ticker and listener.
    pub fn subscribe_depth(
        &self,
        panel_id: PanelId,
        ticker: Ticker,
        listener: DepthListener,
    ) -> Result<()> {
        let mut book = self.depth.write()?;
        if let Some(previous) = book.panel_tickers.insert(panel_id.clone(), ticker.clone()) {
            if previous != ticker {
                book.detach(&previous, &panel_id);
            }
        }
        let feed = book.feeds.entry(ticker.clone()).or_insert_with(|| {
            debug!("Allocated stream for {}", ticker);
            TickerFeed {
                panels: HashMap::new(),
                stream: Mutex::new(TickerStream::seeded(&ticker)),
            }
        });
        feed.panels.insert(panel_id, listener);
        Ok(())
    }

    /// Stops depth for `panel_id`. Returns `false` if the panel was unknown.
    ///
    /// With an `owner`, the panel is only removed while it is still routed to
    /// that listener; a panel re-registered by another connection is left
    /// alone and `false` is returned.
    pub fn unsubscribe_depth(
        &self,
        panel_id: &PanelId,
        owner: Option<&DepthListener>,
    ) -> Result<bool> {
        let mut book = self.depth.write()?;
        let Some(ticker) = book.panel_tickers.get(panel_id).cloned() else {
            return Ok(false);
        };
        if let Some(owner) = owner {
            let owned = book
                .feeds
                .get(&ticker)
                .and_then(|feed| feed.panels.get(panel_id))
                .is_some_and(|listener| listener.same_channel(owner));
            if !owned {
                return Ok(false);
            }
        }
        book.panel_tickers.remove(panel_id);
        Ok(book.detach(&ticker, panel_id))
    }

    /// Visits every ticker that currently has at least one panel, holding the
    /// read lock for the whole pass.
    pub fn for_each_active_ticker(&self, mut visit: impl FnMut(ActiveTicker<'_>)) -> Result<()> {
        let book = self.depth.read()?;
        for (ticker, feed) in &book.feeds {
            if feed.panels.is_empty() {
                continue;
            }
            let mut stream = feed.stream.lock()?;
            visit(ActiveTicker {
                ticker,
                stream: &mut *stream,
                panels: &feed.panels,
            });
        }
        Ok(())
    }

    /// Tickers with at least one panel, sorted.
    pub fn active_tickers(&self) -> Result<Vec<Ticker>> {
        let book = self.depth.read()?;
        let mut tickers: Vec<Ticker> = book.feeds.keys().cloned().collect();
        tickers.sort();
        Ok(tickers)
    }

    /// Number of panels across all tickers.
    pub fn panel_count(&self) -> Result<usize> {
        Ok(self.depth.read()?.panel_tickers.len())
    }

    /// Adds a global print listener.
    pub fn subscribe_print(&self, listener: PrintListener) -> Result<ListenerId> {
        let id = self.next_id();
        self.listeners.write()?.prints.push((id, listener));
        Ok(id)
    }

    /// Adds a global print listener after queueing the last `count` trades to
    /// it as one `ReceivePrint` keyed by `backlog_key`. Both happen under the
    /// pipeline's write lock, so every trade reaches the listener exactly once,
    /// either in the backlog or live.
    pub fn subscribe_print_with_backlog(
        &self,
        listener: PrintListener,
        backlog_key: String,
        count: usize,
    ) -> Result<ListenerId> {
        let id = self.next_id();
        let mut listeners = self.listeners.write()?;
        let prints: Arc<[PrintEntry]> = self
            .ledger
            .recent(count)?
            .iter()
            .map(Trade::to_print_entry)
            .collect();
        debug!("Sending {} backlog prints to {}", prints.len(), backlog_key);
        if listener
            .send(ServerEvent::ReceivePrint {
                key: backlog_key,
                prints,
            })
            .is_err()
        {
            warn!("Print backlog not delivered to {}: connection closed", id);
        }
        listeners.prints.push((id, listener));
        Ok(id)
    }

    /// Removes a print listener. Returns `false` if the handle was unknown.
    pub fn unsubscribe_print(&self, id: ListenerId) -> Result<bool> {
        let mut listeners = self.listeners.write()?;
        let before = listeners.prints.len();
        listeners.prints.retain(|(existing, _)| *existing != id);
        Ok(listeners.prints.len() != before)
    }

    /// Adds a raw trade listener.
    pub fn subscribe_trade(&self, listener: TradeListener) -> Result<ListenerId> {
        let id = self.next_id();
        self.listeners.write()?.trades.push((id, listener));
        Ok(id)
    }

    /// Removes a trade listener. Returns `false` if the handle was unknown.
    pub fn unsubscribe_trade(&self, id: ListenerId) -> Result<bool> {
        let mut listeners = self.listeners.write()?;
        let before = listeners.trades.len();
        listeners.trades.retain(|(existing, _)| *existing != id);
        Ok(listeners.trades.len() != before)
    }

    /// Number of registered print listeners.
    pub fn print_listener_count(&self) -> Result<usize> {
        Ok(self.listeners.read()?.prints.len())
    }

    /// Records an order as an immediately filled trade.
    pub fn place_order(
        &self,
        ticker: Ticker,
        side: TradeSide,
        price: Decimal,
        quantity: u32,
        time: DateTime<Utc>,
        origin_panel: Option<PanelId>,
    ) -> Result<()> {
        info!("Order filled: {} {} {} @ {}", side, quantity, ticker, price);
        self.dispatch_trade(Trade {
            time,
            side,
            ticker,
            price,
            quantity,
            origin_panel,
        })
    }

    /// Runs one trade through the pipeline: trade listeners, then print
    /// listeners, then the ledger.
    pub fn dispatch_trade(&self, trade: Trade) -> Result<()> {
        let listeners = self.listeners.read()?;
        for (id, listener) in &listeners.trades {
            if listener.send(trade.clone()).is_err() {
                warn!("Trade not delivered to {}: listener closed", id);
            }
        }
        let event = ServerEvent::ReceivePrint {
            key: trade.ticker.to_string(),
            prints: Arc::from(vec![trade.to_print_entry()]),
        };
        for (id, listener) in &listeners.prints {
            if listener.send(event.clone()).is_err() {
                warn!("Print not delivered to {}: connection closed", id);
            }
        }
        self.ledger.record(trade)
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed))
    }
}
