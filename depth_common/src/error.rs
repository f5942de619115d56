//! Error types shared between client and server.
//!
//! The `FeedError` enum unifies the failure cases of the feed: I/O, JSON
//! encoding, poisoned locks and the few domain checks
//! (ticker files, tick-size tables, order text, connection lookups), so every
//! crate in the workspace can propagate a single error type with `?`.
use std::io;
use std::sync::PoisonError;

use thiserror::Error;

/// Unified error type shared by client and server.
#[derive(Error, Debug)]
pub enum FeedError {
    /// I/O error originating from sockets or files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic formatting/validation error with a human-readable message.
    #[error("Format error: {0}")]
    Format(String),

    /// Error while parsing the ticker file into `Ticker` values.
    #[error("Parse tickers file error: {0}")]
    ParseTickersFile(String),

    /// Failure while encoding/decoding JSON via serde_json.
    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// A poisoned mutex/lock was encountered.
    #[error("Mutex Lock Poisoned: {0}")]
    MutexLock(String),

    /// Tick-size tiers do not cover `[0, +inf)` contiguously.
    #[error("Invalid tick size table: {0}")]
    InvalidTickTable(String),

    /// A command referenced a connection that is unknown or already closed.
    #[error("Unknown connection: {0}")]
    UnknownConnection(u64),

    /// Order text could not be parsed (`SIDE TICKER PRICE QUANTITY`).
    #[error("Invalid order: {0}")]
    InvalidOrder(String),
}

impl<T> From<PoisonError<T>> for FeedError {
    fn from(err: PoisonError<T>) -> Self {
        FeedError::MutexLock(err.to_string())
    }
}
