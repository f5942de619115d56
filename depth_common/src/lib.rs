//!
//! Common types and utilities shared by the depth feed server and client.
//!
//! This crate aggregates:
//! - `error`: unified error type `FeedError` used across the workspace.
//! - `result`: handy `Result<T, FeedError>` alias.
//! - `tickers`: ticker symbols and the ticker-file parser.
//! - `market`: depth levels, trades and prints.
//! - `command`: session commands and server events exchanged as JSON lines.
//! - `net`: networking constants and small helpers.
#![warn(missing_docs)]
pub mod command;
pub mod error;
pub mod market;
pub mod net;
pub mod result;
pub mod tickers;

pub use command::{ClientCommand, ServerEvent};
pub use error::FeedError;
pub use result::Result;
