//! Ticker symbols and helpers shared between client and server.
//!
//! A `Ticker` is an opaque symbol: the feed never interprets it beyond using it
//! as a key. The list of tickers offered to viewers is configuration, read from
//! a plain text file or taken from [`DEFAULT_TICKERS`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::BufRead;
use std::str::FromStr;

use crate::error::FeedError;

/// Symbols offered when no ticker file is configured.
pub const DEFAULT_TICKERS: [&str; 10] = [
    "AAPL", "MSFT", "AMZN", "GOOGL", "NVDA", "BRK.B", "META", "TSLA", "UNH", "JNJ",
];

/// Trait providing file parsing for tickers.
pub trait TickerParser {
    /// Parses tickers from a buffered reader.
    ///
    /// Symbols may be separated by new lines, commas or whitespace; blank
    /// entries are skipped. Returns an error if any entry cannot be parsed.
    fn parse_from_file<R: BufRead>(reader: R) -> Result<Vec<Ticker>, FeedError>;
}

impl TickerParser for Ticker {
    fn parse_from_file<R: BufRead>(reader: R) -> Result<Vec<Self>, FeedError> {
        let mut tickers = Vec::new();

        for line_result in reader.lines() {
            let line = line_result.map_err(FeedError::Io)?;
            for raw in line.split(|c: char| c == ',' || c.is_whitespace()) {
                if raw.is_empty() {
                    continue;
                }
                match raw.parse::<Self>() {
                    Ok(ticker) if !tickers.contains(&ticker) => tickers.push(ticker),
                    Ok(_) => {}
                    Err(e) => return Err(FeedError::ParseTickersFile(e.to_string())),
                }
            }
        }
        Ok(tickers)
    }
}

/// Market symbol, e.g. `AAPL`. Always upper-case and non-empty.
#[derive(Debug, Clone, Serialize, Deserialize, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[serde(transparent)]
pub struct Ticker(String);

impl Ticker {
    /// Builds a ticker from a symbol, normalising case and surrounding spaces.
    pub fn new(symbol: &str) -> Result<Self, FeedError> {
        symbol.parse()
    }

    /// The symbol as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The built-in list of available tickers.
    pub fn defaults() -> Vec<Ticker> {
        DEFAULT_TICKERS
            .iter()
            .map(|s| Ticker(s.to_string()))
            .collect()
    }
}

impl FromStr for Ticker {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(FeedError::Format(format!("invalid ticker symbol: {:?}", s)));
        }
        Ok(Ticker(trimmed.to_ascii_uppercase()))
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
