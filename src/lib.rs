//! Multi-hop triangular arbitrage engine for spot order books.
//!
//! Given a snapshot of order books, the engine enumerates 3- and 4-hop
//! cycles that start and end in a base asset, simulates each one against
//! book depth with taker fees compounded per hop, and ranks the profitable
//! ones. A risk evaluator sizes and accepts or rejects each opportunity,
//! and an execution coordinator runs accepted routes as market orders.
//!
//! # Example
//!
//! ```text
//! USDT -> BTC   buy  BTCUSDT @ 50000      100 USDT -> 0.001998 BTC
//! BTC  -> ETH   buy  ETHBTC  @ 0.05                -> 0.03992004 ETH
//! ETH  -> USDT  sell ETHUSDT @ 2600                -> 103.688312 USDT
//! ─────────────────────────────────────────────────────────────────
//! Net gain:     3.69% after 0.1% taker fee per hop
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment, with profiles
//! - [`error`]: Unified error types
//! - [`market`]: Symbols, fees, the market data source and REST client
//! - [`orderbook`]: Order books, snapshots and fill estimation
//! - [`arbitrage`]: Route simulation, scanning and execution
//! - [`risk`]: Liquidity checks, risk metrics and position sizing
//! - [`trading`]: Order types, the exchange trait and paper trading
//! - [`engine`]: Scan cycle orchestration
//! - [`api`]: HTTP API for health, status and metrics
//! - [`metrics`]: Prometheus metrics
//! - [`utils`]: Shutdown signal handling

pub mod api;
pub mod arbitrage;
pub mod config;
pub mod engine;
pub mod error;
pub mod market;
pub mod metrics;
pub mod orderbook;
pub mod risk;
pub mod trading;
pub mod utils;

pub use config::Config;
pub use engine::ArbitrageEngine;
pub use error::{BotError, Result};
