//! Mock exchange for unit and scenario testing.
//!
//! This module provides a mock that serves market data and fills orders
//! without making real network requests.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{MarketError, TradingError};
use crate::orderbook::{estimate_fill, PriceLevel, SymbolBook};
use crate::trading::{Exchange, OrderFill, OrderRequest, OrderStatus, Side};

use super::source::MarketDataSource;
use super::types::{Symbol, SymbolSet, Ticker24h};

/// Configuration for mock behavior.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Whether to fail exchange info requests.
    pub fail_symbols: bool,
    /// Whether to fail order book requests.
    pub fail_order_book: bool,
    /// Whether to fail ticker requests.
    pub fail_tickers: bool,
    /// Reason returned by failing borrow requests.
    pub fail_borrow: Option<String>,
    /// Reason returned by failing repay requests.
    pub fail_repay: Option<String>,
    /// Simulated latency in milliseconds.
    pub latency_ms: u64,
}

#[derive(Debug, Default)]
struct MockState {
    symbols: Vec<Symbol>,
    books: HashMap<String, SymbolBook>,
    tickers: Vec<Ticker24h>,
    balances: HashMap<String, Decimal>,
    fill_prices: HashMap<String, Decimal>,
    order_failures: HashMap<String, (u32, TradingError)>,
    hanging: Vec<String>,
    orders: Vec<OrderRequest>,
    borrows: Vec<(String, Decimal)>,
    repays: Vec<(String, Decimal)>,
    next_order_id: u64,
}

/// Mock exchange serving both market data and order routing.
#[derive(Debug, Clone, Default)]
pub struct MockExchange {
    config: MockConfig,
    state: Arc<Mutex<MockState>>,
}

impl MockExchange {
    /// Create a new mock with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock with custom configuration.
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            config,
            state: Arc::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a tradable symbol.
    pub fn add_symbol(&self, symbol: Symbol) {
        self.state().symbols.push(symbol);
    }

    /// Set the book served for its symbol.
    pub fn set_order_book(&self, book: SymbolBook) {
        self.state().books.insert(book.symbol.clone(), book);
    }

    /// Add a 24h ticker.
    pub fn add_ticker(&self, ticker: Ticker24h) {
        self.state().tickers.push(ticker);
    }

    /// Set the free balance of an asset.
    pub fn set_balance(&self, asset: &str, amount: Decimal) {
        self.state().balances.insert(asset.to_string(), amount);
    }

    /// Fill every order on `symbol` at `price` instead of the book average.
    pub fn set_fill_price(&self, symbol: &str, price: Decimal) {
        self.state().fill_prices.insert(symbol.to_string(), price);
    }

    /// Fail the next `count` orders on `symbol` with `error`.
    pub fn fail_orders(&self, symbol: &str, count: u32, error: TradingError) {
        self.state()
            .order_failures
            .insert(symbol.to_string(), (count, error));
    }

    /// Never answer orders on `symbol`.
    pub fn hang_orders(&self, symbol: &str) {
        self.state().hanging.push(symbol.to_string());
    }

    /// Orders received, in submission order.
    pub fn orders(&self) -> Vec<OrderRequest> {
        self.state().orders.clone()
    }

    /// Borrow requests received.
    pub fn borrows(&self) -> Vec<(String, Decimal)> {
        self.state().borrows.clone()
    }

    /// Repay requests received.
    pub fn repays(&self) -> Vec<(String, Decimal)> {
        self.state().repays.clone()
    }

    /// Clear all mock data.
    pub fn clear(&self) {
        *self.state() = MockState::default();
    }

    async fn simulate_latency(&self) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }
    }
}

#[async_trait]
impl MarketDataSource for MockExchange {
    async fn exchange_symbols(&self) -> Result<SymbolSet, MarketError> {
        self.simulate_latency().await;

        if self.config.fail_symbols {
            return Err(MarketError::FetchFailed {
                symbol: "exchangeInfo".to_string(),
                reason: "Mock exchange info failure".to_string(),
            });
        }

        let symbols = self.state().symbols.clone();
        if symbols.is_empty() {
            return Err(MarketError::NoSymbols);
        }
        Ok(SymbolSet::new(symbols))
    }

    async fn order_book(&self, symbol: &str, depth: usize) -> Result<SymbolBook, MarketError> {
        self.simulate_latency().await;

        if self.config.fail_order_book {
            return Err(MarketError::FetchFailed {
                symbol: symbol.to_string(),
                reason: "Mock order book failure".to_string(),
            });
        }

        let state = self.state();
        let book = match state.books.get(symbol) {
            Some(book) => SymbolBook::new(
                symbol,
                book.bids.iter().take(depth).cloned().collect(),
                book.asks.iter().take(depth).cloned().collect(),
                book.updated_at,
            ),
            // Return an empty book if not configured
            None => SymbolBook::new(symbol, Vec::new(), Vec::new(), time::OffsetDateTime::now_utc()),
        };
        Ok(book)
    }

    async fn market_tickers(&self) -> Result<Vec<Ticker24h>, MarketError> {
        self.simulate_latency().await;

        if self.config.fail_tickers {
            return Err(MarketError::FetchFailed {
                symbol: "ticker/24hr".to_string(),
                reason: "Mock ticker failure".to_string(),
            });
        }
        Ok(self.state().tickers.clone())
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn place_market_order(&self, order: &OrderRequest) -> Result<OrderFill, TradingError> {
        self.simulate_latency().await;

        let hang = {
            let mut state = self.state();
            state.orders.push(order.clone());

            if let Some((remaining, error)) = state.order_failures.get_mut(&order.symbol) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(error.clone());
                }
            }
            state.hanging.contains(&order.symbol)
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.state();
        let price = match state.fill_prices.get(&order.symbol) {
            Some(price) => *price,
            None => {
                let book = state
                    .books
                    .get(&order.symbol)
                    .ok_or_else(|| TradingError::OrderRejected {
                        reason: format!("unknown symbol {}", order.symbol),
                    })?;
                estimate_fill(
                    book.levels_for(order.side),
                    order.side,
                    order.quantity.amount(),
                    Decimal::ZERO,
                )
                .map_err(|e| TradingError::OrderRejected {
                    reason: e.to_string(),
                })?
                .price
            }
        };

        let executed_qty = match order.side {
            Side::Buy => order.quantity.amount() / price,
            Side::Sell => order.quantity.amount(),
        };
        state.next_order_id += 1;

        Ok(OrderFill {
            order_id: format!("mock-{}", state.next_order_id),
            status: OrderStatus::Filled,
            executed_qty,
            avg_price: price,
        })
    }

    async fn borrow(&self, asset: &str, amount: Decimal) -> Result<(), TradingError> {
        self.simulate_latency().await;

        if let Some(reason) = &self.config.fail_borrow {
            return Err(TradingError::BorrowFailed {
                asset: asset.to_string(),
                reason: reason.clone(),
            });
        }
        self.state().borrows.push((asset.to_string(), amount));
        Ok(())
    }

    async fn repay(&self, asset: &str, amount: Decimal) -> Result<(), TradingError> {
        self.simulate_latency().await;

        self.state().repays.push((asset.to_string(), amount));
        if let Some(reason) = &self.config.fail_repay {
            return Err(TradingError::RepayFailed {
                asset: asset.to_string(),
                reason: reason.clone(),
            });
        }
        Ok(())
    }

    async fn available_capital(&self, asset: &str) -> Result<Decimal, TradingError> {
        self.simulate_latency().await;
        Ok(self
            .state()
            .balances
            .get(asset)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }
}

/// Builder for creating mock order books with common patterns.
pub struct MockOrderBookBuilder {
    symbol: String,
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
    updated_at: time::OffsetDateTime,
}

impl MockOrderBookBuilder {
    /// Create a new builder for the given symbol.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: Vec::new(),
            asks: Vec::new(),
            updated_at: time::OffsetDateTime::now_utc(),
        }
    }

    /// Add a bid level.
    pub fn bid(mut self, price: Decimal, quantity: Decimal) -> Self {
        self.bids.push(PriceLevel::new(price, quantity));
        self
    }

    /// Add an ask level.
    pub fn ask(mut self, price: Decimal, quantity: Decimal) -> Self {
        self.asks.push(PriceLevel::new(price, quantity));
        self
    }

    /// Create `levels` levels per side stepping away from the touch by `tick`.
    pub fn ladder(
        mut self,
        best_bid: Decimal,
        best_ask: Decimal,
        tick: Decimal,
        quantity: Decimal,
        levels: u32,
    ) -> Self {
        for i in 0..levels {
            let offset = tick * Decimal::from(i);
            self.bids.push(PriceLevel::new(best_bid - offset, quantity));
            self.asks.push(PriceLevel::new(best_ask + offset, quantity));
        }
        self
    }

    /// Stamp the book with `updated_at`.
    pub fn updated_at(mut self, updated_at: time::OffsetDateTime) -> Self {
        self.updated_at = updated_at;
        self
    }

    /// Build the book. Sides are sorted best first.
    pub fn build(self) -> SymbolBook {
        SymbolBook::new(self.symbol, self.bids, self.asks, self.updated_at)
    }
}
