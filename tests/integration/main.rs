//! Scenario tests for the arbitrage engine.
//!
//! Everything here runs against in-memory books and the mock exchange,
//! except the `live` module, which is ignored by default.
//! Run the live tests with: cargo test --test integration -- --ignored

mod execution;
mod live;
mod scenarios;

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use triangular_arb::market::{FeeSource, FeeTable, MockOrderBookBuilder, Symbol, SymbolSet};
use triangular_arb::orderbook::{MarketSnapshot, SymbolBook};

/// Flat 0.1% taker fees.
pub fn fees() -> Arc<dyn FeeSource> {
    Arc::new(FeeTable::default())
}

/// BTC, ETH and USDT with every pair listed.
pub fn triangle_symbols() -> SymbolSet {
    SymbolSet::new([
        Symbol::new("BTC", "USDT"),
        Symbol::new("ETH", "BTC"),
        Symbol::new("ETH", "USDT"),
    ])
}

/// Five-level books where 100 USDT fills entirely at the touch.
///
/// `USDT -> BTC -> ETH -> USDT` nets 103.688312 from 100.
pub fn triangle_books() -> Vec<SymbolBook> {
    vec![
        MockOrderBookBuilder::new("BTCUSDT")
            .ladder(dec!(49990), dec!(50000), dec!(1), dec!(1000), 5)
            .build(),
        MockOrderBookBuilder::new("ETHBTC")
            .ladder(dec!(0.0499), dec!(0.05), dec!(0.0001), dec!(1000), 5)
            .build(),
        MockOrderBookBuilder::new("ETHUSDT")
            .ladder(dec!(2600), dec!(2601), dec!(1), dec!(1000), 5)
            .build(),
    ]
}

/// Snapshot of [`triangle_books`].
pub fn triangle_snapshot() -> MarketSnapshot {
    MarketSnapshot::from_books(triangle_books())
}

/// Hand-computed final amount of the triangle at 100 USDT.
pub fn expected_triangle_final() -> Decimal {
    // 100 / 50000 * 0.999 / 0.05 * 0.999 * 2600 * 0.999
    dec!(103.688311896)
}
