//! Exchange abstraction used by the execution coordinator.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::order::{OrderFill, OrderRequest};
use crate::error::TradingError;
use crate::market::SymbolSet;
use crate::orderbook::MarketSnapshot;

/// Order routing and margin operations.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Submit a market order and wait for its fill.
    async fn place_market_order(&self, order: &OrderRequest) -> Result<OrderFill, TradingError>;

    /// Borrow `amount` of `asset` on margin.
    async fn borrow(&self, asset: &str, amount: Decimal) -> Result<(), TradingError>;

    /// Repay `amount` of a margin loan in `asset`.
    async fn repay(&self, asset: &str, amount: Decimal) -> Result<(), TradingError>;

    /// Free balance of `asset`.
    async fn available_capital(&self, asset: &str) -> Result<Decimal, TradingError>;

    /// Latest books, for backends that fill locally.
    fn observe_snapshot(&self, _snapshot: &Arc<MarketSnapshot>) {}

    /// Latest symbol metadata, for backends that fill locally.
    fn observe_symbols(&self, _symbols: &Arc<SymbolSet>) {}
}

#[async_trait]
impl<T: Exchange + ?Sized> Exchange for Arc<T> {
    async fn place_market_order(&self, order: &OrderRequest) -> Result<OrderFill, TradingError> {
        (**self).place_market_order(order).await
    }

    async fn borrow(&self, asset: &str, amount: Decimal) -> Result<(), TradingError> {
        (**self).borrow(asset, amount).await
    }

    async fn repay(&self, asset: &str, amount: Decimal) -> Result<(), TradingError> {
        (**self).repay(asset, amount).await
    }

    async fn available_capital(&self, asset: &str) -> Result<Decimal, TradingError> {
        (**self).available_capital(asset).await
    }

    fn observe_snapshot(&self, snapshot: &Arc<MarketSnapshot>) {
        (**self).observe_snapshot(snapshot)
    }

    fn observe_symbols(&self, symbols: &Arc<SymbolSet>) {
        (**self).observe_symbols(symbols)
    }
}
