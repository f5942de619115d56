//! Synthetic depth and print feed server.
//!
//! Viewers connect over TCP, open per-ticker panels and receive depth snapshots
//! and trade prints as JSON lines. The binary wires together:
//!
//! - `SubscriptionRegistry`: who wants which ticker's depth, who listens to
//!   prints and trades; also the single trade pipeline.
//! - `MarketGenerator`: depth and print schedules on their own threads.
//! - `TradeHistoryStore`: loads the trade history at startup, appends every
//!   trade while running and saves the last 100 trades on shutdown.
//! - `SessionGateway` + `TcpSessionServer`: one session per socket; commands
//!   in, events out through a per-session writer thread.
//!
//! Shutdown (Ctrl+C): both schedules are cancelled and joined, then the trade
//! appender is drained and the history saved. Open sessions are dropped with
//! the process.
#![warn(missing_docs)]
use crate::args::Args;
use crate::gateway::SessionGateway;
use crate::model::market_generator::MarketGenerator;
use crate::model::price_model::{DEFAULT_RANGE, PriceModel};
use crate::model::trade_ledger::TradeLedger;
use crate::persistence::TradeHistoryStore;
use crate::registry::SubscriptionRegistry;
use crate::storage::FileTradeStorage;
use crate::transport::TcpSessionServer;
use clap::Parser;
use depth_common::FeedError;
use depth_common::Result;
use log::{info, warn};
use std::sync::Arc;

mod args;
mod gateway;
pub mod model;
mod persistence;
mod registry;
mod storage;
mod transport;

fn main() -> Result<(), FeedError> {
    init_logger();
    let args = Args::parse();

    let prices = PriceModel::standard();
    let tickers = args.available_tickers()?;
    for ticker in &tickers {
        if !prices.has_range(ticker) {
            warn!("No price range for {}, using {}-{}", ticker, DEFAULT_RANGE.min, DEFAULT_RANGE.max);
        }
    }
    info!(
        "Available tickers: {}",
        tickers.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", ")
    );

    let registry = Arc::new(SubscriptionRegistry::new(Arc::new(TradeLedger::new(
        args.history_capacity,
    ))));
    let storage = Arc::new(FileTradeStorage::new(&args.history_path));
    info!("Trade history file: {}", storage.path().display());
    let mut history = TradeHistoryStore::new(storage, Arc::clone(&registry));
    history.start()?;

    let generator = Arc::new(MarketGenerator::new(Arc::clone(&registry), prices));
    let schedules = generator.start(args.schedule())?;

    let gateway = Arc::new(SessionGateway::new(Arc::clone(&registry)));
    let server = TcpSessionServer::bind(&args.bind, gateway)?;
    info!("Session endpoint listening on {}", server.local_addr()?);
    server.spawn()?;

    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .map_err(|e| FeedError::Format(format!("Error setting Ctrl+C handler: {}", e)))?;

    let _ = shutdown_rx.recv();
    info!("Ctrl+C received. Shutting down server...");
    schedules.stop();
    history.stop()?;
    info!("Server stopped");
    Ok(())
}

fn init_logger() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}
