//! Depth Client is a TCP viewer for the depth feed. It opens one panel per ticker,
//! logs the top of every depth snapshot and every trade print it receives, and
//! can place orders given on the command line. Lost connections are
//! re-established automatically and every panel is subscribed again.
//!
//! Usage example (CLI):
//! ```bash
//! depth_client --server 192.168.0.10:8090 --path ./tickers.txt --order "BUY AAPL 175.00 10"
//! ```
//!
//! The ticker file should contain symbols separated by commas, spaces, or new lines.
//! Without `--path` the client opens panels for the built-in ticker list.
#![warn(missing_docs)]
mod args;
mod model;
mod reconnect;

use crate::args::Args;
use crate::model::order::OrderRequest;
use crate::reconnect::{Backoff, ReconnectingClient, SubscriptionTracker};
use clap::Parser;
use crossbeam_channel::{RecvTimeoutError, unbounded};
use depth_common::FeedError;
use depth_common::Result;
use depth_common::command::ServerEvent;
use depth_common::market::{BookSide, PanelId};
use depth_common::tickers::{Ticker, TickerParser};
use log::{debug, error, info};
use std::fs::File;
use std::io::BufReader;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread;
use std::time::Duration;

fn main() -> Result<(), FeedError> {
    init_logger();
    let args = Args::parse();
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("Ctrl+C received. Shutting down client...");
            shutdown.store(true, Ordering::SeqCst);
        })
        .map_err(|e| FeedError::Format(format!("Error setting Ctrl+C handler: {}", e)))?;
    }

    let tickers = match &args.path {
        Some(path) => Ticker::parse_from_file(BufReader::new(File::open(path)?))?,
        None => Ticker::defaults(),
    };
    info!("Tickers: {:?}", tickers);

    let orders = args
        .orders
        .iter()
        .map(|text| text.parse::<OrderRequest>())
        .collect::<Result<Vec<_>>>()?;

    let mut tracker = SubscriptionTracker::default();
    for ticker in tickers {
        tracker.track(new_panel_id(&ticker), ticker);
    }
    let commands: Vec<_> = orders
        .iter()
        .map(|order| order.to_command(tracker.panel_for(&order.ticker).cloned()))
        .collect();

    let (events_tx, events_rx) = unbounded::<ServerEvent>();
    let mut client = ReconnectingClient::new(
        args.server.clone(),
        tracker,
        Backoff::default(),
        events_tx,
        shutdown.clone(),
    );
    for command in commands {
        client.place(command);
    }
    let session = thread::Builder::new()
        .name("depth-session".to_string())
        .spawn(move || client.run())?;

    info!("Client is running against {}. Press Ctrl+C to exit.", args.server);
    while !shutdown.load(Ordering::Relaxed) {
        match events_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => log_event(&event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    match session.join() {
        Ok(result) => result,
        Err(_) => {
            error!("Session thread panicked");
            Err(FeedError::Format("session thread panicked".to_string()))
        }
    }
}

fn init_logger() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

/// Panel id unique enough to survive reconnects of other viewers.
fn new_panel_id(ticker: &Ticker) -> PanelId {
    PanelId::new(format!("{}-{:08x}", ticker, rand::random::<u32>()))
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::ReceiveDepth { panel_id, entries } => {
            let best_bid = entries
                .iter()
                .filter(|e| e.side == BookSide::Bid)
                .max_by_key(|e| e.price);
            let best_ask = entries
                .iter()
                .filter(|e| e.side == BookSide::Ask)
                .min_by_key(|e| e.price);
            match (best_bid, best_ask) {
                (Some(bid), Some(ask)) => info!(
                    "DEPTH {}: bid {} x{} / ask {} x{} ({} levels)",
                    panel_id,
                    bid.price,
                    bid.size,
                    ask.price,
                    ask.size,
                    entries.len()
                ),
                _ => info!("DEPTH {}: {} levels", panel_id, entries.len()),
            }
        }
        ServerEvent::ReceivePrint { key, prints } if prints.len() == 1 => {
            let print = &prints[0];
            info!(
                "PRINT {}: {} {} @ {} x{} ({})",
                key, print.side, print.ticker, print.price, print.quantity, print.time
            );
        }
        ServerEvent::ReceivePrint { key, prints } => {
            info!("BACKLOG {}: {} prints", key, prints.len());
            for print in prints.iter() {
                debug!(
                    "  {} {} {} @ {} x{}",
                    print.time, print.side, print.ticker, print.price, print.quantity
                );
            }
        }
    }
}
