//! Command line configuration of the depth server.
use clap::Parser;
use depth_common::Result;
use depth_common::net::{SESSION_PORT, addr};
use depth_common::tickers::{Ticker, TickerParser};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;

use crate::model::market_generator::Schedule;
use crate::model::trade_ledger::DEFAULT_CAPACITY;

/// Synthetic depth and print feed server.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// Address of the session endpoint.
    #[arg(long, default_value_t = addr("0.0.0.0", SESSION_PORT))]
    pub bind: String,

    /// Milliseconds between depth snapshots.
    #[arg(long, default_value_t = 500)]
    pub depth_interval_ms: u64,

    /// Milliseconds between synthetic prints.
    #[arg(long, default_value_t = 2000)]
    pub print_interval_ms: u64,

    /// JSON-lines file holding the trade history.
    #[arg(long, default_value = "trade_history.jsonl")]
    pub history_path: PathBuf,

    /// Trades kept in memory.
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    pub history_capacity: usize,

    /// File listing the tickers offered to viewers (built-in list if absent).
    #[arg(long)]
    pub tickers: Option<PathBuf>,
}

impl Args {
    /// Periods of the depth and print schedules.
    pub fn schedule(&self) -> Schedule {
        Schedule {
            depth_interval: Duration::from_millis(self.depth_interval_ms.max(1)),
            print_interval: Duration::from_millis(self.print_interval_ms.max(1)),
        }
    }

    /// Tickers from `--tickers`, or the default list.
    pub fn available_tickers(&self) -> Result<Vec<Ticker>> {
        match &self.tickers {
            Some(path) => Ticker::parse_from_file(BufReader::new(File::open(path)?)),
            None => Ok(Ticker::defaults()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["depth_server"]);
        assert_eq!(args.bind, "0.0.0.0:8090");
        let schedule = args.schedule();
        assert_eq!(schedule.depth_interval, Duration::from_millis(500));
        assert_eq!(schedule.print_interval, Duration::from_millis(2000));
        assert_eq!(args.available_tickers().unwrap().len(), 10);
    }

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "depth_server",
            "--bind",
            "127.0.0.1:9000",
            "--depth-interval-ms",
            "100",
            "--print-interval-ms",
            "0",
        ]);
        assert_eq!(args.bind, "127.0.0.1:9000");
        assert_eq!(args.schedule().depth_interval, Duration::from_millis(100));
        assert_eq!(args.schedule().print_interval, Duration::from_millis(1));
    }
}
