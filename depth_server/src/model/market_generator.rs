//! Synthetic depth and print generation.
//!
//! The `MarketGenerator` runs two independent schedules, each on its own
//! thread driven by a `crossbeam_channel::tick`:
//!
//! - depth: for every ticker with at least one panel, draw a mid price from the
//!   ticker's range, build 10 ask and 10 bid levels around it and deliver the
//!   same snapshot to every panel of that ticker;
//! - print: for every such ticker, synthesize one trade a few ticks away from
//!   the latest mid and push it through the registry's trade pipeline.
//!
//! Both schedules only ever see tickers that currently have panels, so a
//! ticker nobody watches consumes no randomness and fires no deliveries.
//! Stopping the generator drops the shared stop channel; each schedule
//! finishes the tick in progress, then exits and is joined.

use crossbeam_channel::{Receiver, Sender, select, tick};
use chrono::Utc;
use depth_common::Result;
use depth_common::market::{BookSide, DepthEntry, Trade, TradeSide};
use depth_common::tickers::Ticker;
use log::{debug, error, info};
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::model::price_model::PriceModel;
use crate::registry::{SubscriptionRegistry, TickerStream};

/// Levels on each side of a snapshot.
pub const DEPTH_LEVELS: i64 = 10;
/// Synthetic prints land within this many ticks of the reference price.
const PRINT_TICK_SPREAD: i64 = 3;

/// Periods of the two schedules.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    /// Time between depth snapshots.
    pub depth_interval: Duration,
    /// Time between synthetic prints.
    pub print_interval: Duration,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            depth_interval: Duration::from_millis(500),
            print_interval: Duration::from_millis(2000),
        }
    }
}

/// Builds one depth snapshot for `ticker` from its stream: 10 asks from the
/// farthest level down to the nearest, then 10 bids from the nearest level
/// outwards. Records the drawn mid in `stream.last_mid`.
pub fn build_depth(prices: &PriceModel, ticker: &Ticker, stream: &mut TickerStream) -> Vec<DepthEntry> {
    let range = prices.price_range_for(ticker);
    let span_cents = ((range.max - range.min) * Decimal::ONE_HUNDRED)
        .trunc()
        .to_i64()
        .unwrap_or(0);
    let offset = if span_cents > 0 {
        stream.rng.random_range(0..span_cents)
    } else {
        0
    };
    let mid = range.min.round_dp(2) + Decimal::new(offset, 2);
    let tick_size = prices.tick_size_for(mid);
    stream.last_mid = Some(mid);

    let mut level = |side: BookSide, price: Decimal| DepthEntry {
        side,
        price,
        size: stream.rng.random_range(1..50),
        percent_change: percent_from(mid, price),
    };

    let mut entries = Vec::with_capacity(2 * DEPTH_LEVELS as usize);
    for lvl in (1..=DEPTH_LEVELS).rev() {
        entries.push(level(BookSide::Ask, mid + tick_size * Decimal::from(lvl)));
    }
    for lvl in 1..=DEPTH_LEVELS {
        entries.push(level(BookSide::Bid, mid - tick_size * Decimal::from(lvl)));
    }
    entries
}

/// Synthesizes one print for `ticker`, priced within a few ticks of the last
/// mid (or of the range midpoint before the first snapshot).
pub fn synthesize_print(prices: &PriceModel, ticker: &Ticker, stream: &mut TickerStream) -> Trade {
    let reference = stream
        .last_mid
        .unwrap_or_else(|| prices.price_range_for(ticker).midpoint());
    let tick_size = prices.tick_size_for(reference);
    let ticks = stream.rng.random_range(-PRINT_TICK_SPREAD..=PRINT_TICK_SPREAD);
    let side = if stream.rng.random_bool(0.5) {
        TradeSide::Buy
    } else {
        TradeSide::Sell
    };
    Trade {
        time: Utc::now(),
        side,
        ticker: ticker.clone(),
        price: reference + tick_size * Decimal::from(ticks),
        quantity: stream.rng.random_range(1..10),
        origin_panel: None,
    }
}

fn percent_from(mid: Decimal, price: Decimal) -> Decimal {
    if mid.is_zero() {
        return Decimal::ZERO;
    }
    ((price - mid) / mid * Decimal::ONE_HUNDRED).round_dp(2)
}

/// Background market data generator that feeds the registry's subscribers.
pub struct MarketGenerator {
    registry: Arc<SubscriptionRegistry>,
    prices: PriceModel,
}

impl MarketGenerator {
    /// Creates a generator over `registry` using `prices` for ranges and ticks.
    pub fn new(registry: Arc<SubscriptionRegistry>, prices: PriceModel) -> Self {
        Self { registry, prices }
    }

    /// One depth pass. Returns the number of snapshots delivered.
    pub fn depth_tick(&self) -> Result<usize> {
        let mut delivered = 0;
        self.registry.for_each_active_ticker(|active| {
            let entries: Arc<[DepthEntry]> =
                build_depth(&self.prices, active.ticker, active.stream).into();
            delivered += active.deliver_depth(&entries);
        })?;
        Ok(delivered)
    }

    /// One print pass. Returns the number of trades generated.
    ///
    /// Trades are generated under the registry's read lock and dispatched
    /// after it is released.
    pub fn print_tick(&self) -> Result<usize> {
        let mut trades = Vec::new();
        self.registry.for_each_active_ticker(|active| {
            trades.push(synthesize_print(&self.prices, active.ticker, active.stream));
        })?;
        let count = trades.len();
        for trade in trades {
            self.registry.dispatch_trade(trade)?;
        }
        Ok(count)
    }

    /// Starts the depth and print schedules on their own threads.
    pub fn start(self: Arc<Self>, schedule: Schedule) -> Result<GeneratorHandle> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);

        let depth = Arc::clone(&self);
        let depth_worker = spawn_schedule(
            "depth-schedule",
            schedule.depth_interval,
            stop_rx.clone(),
            move || depth.depth_tick(),
        )?;
        let print = Arc::clone(&self);
        let print_worker = spawn_schedule(
            "print-schedule",
            schedule.print_interval,
            stop_rx,
            move || print.print_tick(),
        )?;

        info!(
            "Market generator started: depth every {:?}, prints every {:?}",
            schedule.depth_interval, schedule.print_interval
        );
        Ok(GeneratorHandle {
            stop_tx: Some(stop_tx),
            workers: vec![depth_worker, print_worker],
        })
    }
}

/// Runs `job` every `interval` until `stop_rx` is closed. A failing tick is
/// logged and the schedule keeps going.
fn spawn_schedule<F>(
    name: &str,
    interval: Duration,
    stop_rx: Receiver<()>,
    job: F,
) -> Result<JoinHandle<()>>
where
    F: Fn() -> Result<usize> + Send + 'static,
{
    let thread_name = name.to_string();
    let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
        let timer = tick(interval);
        loop {
            select! {
                recv(stop_rx) -> _ => break,
                recv(timer) -> _ => match job() {
                    Ok(count) => debug!("{}: {} deliveries", thread_name, count),
                    Err(e) => error!("{} tick failed: {}", thread_name, e),
                },
            }
        }
        info!("{} stopped", thread_name);
    })?;
    Ok(handle)
}

/// Running schedules. Call [`GeneratorHandle::stop`] to cancel them.
pub struct GeneratorHandle {
    stop_tx: Option<Sender<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl GeneratorHandle {
    /// Cancels both schedules and waits for the ticks in flight to finish.
    pub fn stop(mut self) {
        self.stop_tx.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("Generator schedule panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::trade_ledger::TradeLedger;
    use crossbeam_channel::unbounded;
    use depth_common::command::ServerEvent;
    use depth_common::market::PanelId;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn ticker(s: &str) -> Ticker {
        Ticker::new(s).unwrap()
    }

    fn stream(seed: u64) -> TickerStream {
        TickerStream {
            rng: StdRng::seed_from_u64(seed),
            last_mid: None,
        }
    }

    fn generator() -> (Arc<SubscriptionRegistry>, MarketGenerator) {
        let registry = Arc::new(SubscriptionRegistry::new(Arc::new(TradeLedger::default())));
        let generator = MarketGenerator::new(Arc::clone(&registry), PriceModel::standard());
        (registry, generator)
    }

    #[test]
    fn test_depth_shape_holds_for_every_ticker() {
        let prices = PriceModel::standard();
        let mut tickers = Ticker::defaults();
        tickers.push(ticker("UNLISTED"));

        for (seed, ticker) in tickers.iter().enumerate() {
            let mut stream = stream(seed as u64);
            for _ in 0..200 {
                let entries = build_depth(&prices, ticker, &mut stream);
                let mid = stream.last_mid.unwrap();
                let range = prices.price_range_for(ticker);
                assert!(mid >= range.min && mid < range.max);
                assert_eq!(mid, mid.round_dp(2));
                assert_eq!(entries.len(), 20);

                let (asks, bids) = entries.split_at(10);
                assert!(asks.iter().all(|e| e.side == BookSide::Ask && e.price > mid));
                assert!(bids.iter().all(|e| e.side == BookSide::Bid && e.price < mid));
                assert!(asks.windows(2).all(|w| w[0].price > w[1].price));
                assert!(bids.windows(2).all(|w| w[0].price > w[1].price));

                let tick_size = prices.tick_size_for(mid);
                assert_eq!(asks[9].price - mid, tick_size);
                assert_eq!(mid - bids[0].price, tick_size);
                for entry in &entries {
                    assert!((1..50).contains(&entry.size));
                    assert_eq!(entry.percent_change, percent_from(mid, entry.price));
                    assert!(prices.tick_size_for(entry.price) > Decimal::ZERO);
                }
            }
        }
    }

    #[test]
    fn test_prints_stay_near_reference() {
        let prices = PriceModel::standard();
        let aapl = ticker("AAPL");
        let mut stream = stream(7);
        for _ in 0..200 {
            let trade = synthesize_print(&prices, &aapl, &mut stream);
            let distance = (trade.price - Decimal::new(17500, 2)).abs();
            assert!(distance <= Decimal::new(15, 2));
            assert!((1..10).contains(&trade.quantity));
            assert_eq!(trade.ticker, aapl);
        }

        build_depth(&prices, &aapl, &mut stream);
        let mid = stream.last_mid.unwrap();
        let trade = synthesize_print(&prices, &aapl, &mut stream);
        assert!((trade.price - mid).abs() <= prices.tick_size_for(mid) * Decimal::from(3));
    }

    #[test]
    fn test_depth_tick_reaches_every_panel_with_one_snapshot() {
        let (registry, generator) = generator();
        let (tx, rx) = unbounded();
        registry
            .subscribe_depth(PanelId::new("p1"), ticker("AAPL"), tx.clone())
            .unwrap();
        registry
            .subscribe_depth(PanelId::new("p2"), ticker("AAPL"), tx.clone())
            .unwrap();
        registry
            .subscribe_depth(PanelId::new("p3"), ticker("MSFT"), tx)
            .unwrap();

        assert_eq!(generator.depth_tick().unwrap(), 3);
        let mut aapl_snapshots = Vec::new();
        for event in rx.try_iter() {
            if let ServerEvent::ReceiveDepth { panel_id, entries } = event {
                if panel_id.as_str() != "p3" {
                    aapl_snapshots.push(entries);
                }
            }
        }
        assert_eq!(aapl_snapshots.len(), 2);
        assert!(Arc::ptr_eq(&aapl_snapshots[0], &aapl_snapshots[1]));
    }

    #[test]
    fn test_idle_ticker_does_no_work() {
        let (registry, generator) = generator();
        let (tx, rx) = unbounded();
        registry
            .subscribe_depth(PanelId::new("p1"), ticker("AAPL"), tx)
            .unwrap();
        assert_eq!(generator.depth_tick().unwrap(), 1);
        registry.unsubscribe_depth(&PanelId::new("p1"), None).unwrap();
        rx.try_iter().count();

        assert_eq!(generator.depth_tick().unwrap(), 0);
        assert_eq!(generator.print_tick().unwrap(), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.ledger().len().unwrap(), 0);
    }

    #[test]
    fn test_resubscribed_ticker_restarts_its_sequence() {
        let (registry, generator) = generator();
        let mids = |registry: &SubscriptionRegistry| {
            let (tx, rx) = unbounded();
            registry
                .subscribe_depth(PanelId::new("p1"), ticker("TSLA"), tx)
                .unwrap();
            generator.depth_tick().unwrap();
            generator.depth_tick().unwrap();
            registry.unsubscribe_depth(&PanelId::new("p1"), None).unwrap();
            rx.try_iter().collect::<Vec<_>>()
        };
        assert_eq!(mids(&registry), mids(&registry));
    }

    #[test]
    fn test_order_print_arrives_before_synthetic_print() {
        let (registry, generator) = generator();
        let (depth_tx, depth_rx) = unbounded();
        let (print_tx, print_rx) = unbounded();
        registry
            .subscribe_depth(PanelId::new("p1"), ticker("AAPL"), depth_tx)
            .unwrap();
        registry.subscribe_print(print_tx).unwrap();

        generator.depth_tick().unwrap();
        match depth_rx.try_recv().unwrap() {
            ServerEvent::ReceiveDepth { panel_id, entries } => {
                assert_eq!(panel_id.as_str(), "p1");
                assert_eq!(entries.len(), 20);
                let lowest_ask = entries[..10].iter().map(|e| e.price).min().unwrap();
                let highest_bid = entries[10..].iter().map(|e| e.price).max().unwrap();
                assert!(lowest_ask > highest_bid);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let price = Decimal::new(17500, 2);
        registry
            .place_order(ticker("AAPL"), TradeSide::Buy, price, 10, Utc::now(), None)
            .unwrap();
        generator.print_tick().unwrap();

        let prints: Vec<_> = print_rx.try_iter().collect();
        assert_eq!(prints.len(), 2);
        match &prints[0] {
            ServerEvent::ReceivePrint { key, prints } => {
                assert_eq!(key, "AAPL");
                assert_eq!(prints.len(), 1);
                assert_eq!(prints[0].side, TradeSide::Buy);
                assert_eq!(prints[0].ticker, ticker("AAPL"));
                assert_eq!(prints[0].price, price);
                assert_eq!(prints[0].quantity, 10);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(registry.ledger().len().unwrap(), 2);
    }

    #[test]
    fn test_schedules_run_until_stopped() {
        let (registry, generator) = generator();
        let (tx, rx) = unbounded();
        registry
            .subscribe_depth(PanelId::new("p1"), ticker("AAPL"), tx)
            .unwrap();
        let (print_tx, print_rx) = unbounded();
        registry.subscribe_print(print_tx).unwrap();

        let handle = Arc::new(generator)
            .start(Schedule {
                depth_interval: Duration::from_millis(10),
                print_interval: Duration::from_millis(25),
            })
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(print_rx.recv_timeout(Duration::from_secs(2)).is_ok());
        handle.stop();

        rx.try_iter().count();
        thread::sleep(Duration::from_millis(50));
        assert!(rx.try_recv().is_err());
    }
}
