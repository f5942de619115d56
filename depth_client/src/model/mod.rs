//! Client-side model types.
//!
//! - `order`: orders typed on the command line.
pub mod order;
