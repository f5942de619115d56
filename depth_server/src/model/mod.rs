//! Domain models of the depth server.
//!
//! - `price_model`: per-ticker price ranges and the tick-size ladder.
//! - `market_generator`: depth and print schedules feeding the registry.
//! - `trade_ledger`: bounded in-memory trade history.

pub mod market_generator;
pub mod price_model;
pub mod trade_ledger;
