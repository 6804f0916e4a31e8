//! Market module for exchange metadata and market data.
//!
//! This module handles:
//! - Symbols, trading filters and 24h statistics
//! - The fee model
//! - The market data source trait and REST client
//! - Mock exchange for testing

pub mod client;
pub mod fees;
pub mod mock;
pub mod source;
pub mod types;

pub use client::BinanceClient;
pub use fees::{route_fee_fraction, FeeSource, FeeTable};
pub use mock::{MockConfig, MockExchange, MockOrderBookBuilder};
pub use source::{fetch_snapshot, MarketDataSource};
pub use types::{
    format_quantity, MarketConditions, MarketView, ResolvedLeg, Symbol, SymbolSet, Ticker24h,
};
