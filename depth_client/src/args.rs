//! Command-line arguments for the depth client.
//!
//! This module defines the CLI interface using `clap`. See `main` for end-to-end usage.
use clap::Parser;
use depth_common::net::{SESSION_PORT, addr};
use std::path::PathBuf;

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Session endpoint of the depth server.
    #[clap(long, default_value_t = addr("127.0.0.1", SESSION_PORT))]
    pub server: String,

    /// Path to a text file with tickers to open panels for.
    /// Tickers may be separated by commas, spaces, or new lines.
    #[clap(long)]
    pub path: Option<PathBuf>,

    /// Order to place once connected, e.g. "BUY AAPL 175.00 10". May be repeated.
    #[clap(long = "order")]
    pub orders: Vec<String>,
}
