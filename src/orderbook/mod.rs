//! Order book module for market data.
//!
//! This module handles:
//! - Order book types and point-in-time snapshots
//! - Fill price estimation by walking book depth

pub mod aggregator;
pub mod types;

pub use aggregator::{avg_execution_price, estimate_fill, FillEstimate};
pub use types::{MarketSnapshot, PriceLevel, SymbolBook};
