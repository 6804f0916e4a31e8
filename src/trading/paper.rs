//! Paper trading against the latest snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::{debug, info};

use super::exchange::Exchange;
use super::order::{OrderFill, OrderQuantity, OrderRequest, OrderStatus};
use crate::error::TradingError;
use crate::market::{FeeSource, SymbolSet};
use crate::orderbook::{estimate_fill, MarketSnapshot};

/// Simulated exchange filling market orders against observed books.
///
/// Balances and margin loans live in memory. Nothing leaves the process.
pub struct PaperExchange {
    fees: Arc<dyn FeeSource>,
    slippage_pct: Decimal,
    snapshot: RwLock<Arc<MarketSnapshot>>,
    symbols: RwLock<Arc<SymbolSet>>,
    balances: DashMap<String, Decimal>,
    loans: DashMap<String, Decimal>,
    next_order_id: AtomicU64,
}

impl PaperExchange {
    /// Create a paper exchange holding `balances`.
    pub fn new(
        fees: Arc<dyn FeeSource>,
        slippage_pct: Decimal,
        balances: impl IntoIterator<Item = (String, Decimal)>,
    ) -> Self {
        Self {
            fees,
            slippage_pct,
            snapshot: RwLock::new(Arc::new(MarketSnapshot::default())),
            symbols: RwLock::new(Arc::new(SymbolSet::default())),
            balances: balances.into_iter().collect(),
            loans: DashMap::new(),
            next_order_id: AtomicU64::new(1),
        }
    }

    /// Current balance of `asset`.
    pub fn balance(&self, asset: &str) -> Decimal {
        self.balances.get(asset).map(|b| *b).unwrap_or(Decimal::ZERO)
    }

    /// Outstanding loan in `asset`.
    pub fn loan(&self, asset: &str) -> Decimal {
        self.loans.get(asset).map(|l| *l).unwrap_or(Decimal::ZERO)
    }

    fn credit(&self, asset: &str, amount: Decimal) {
        *self.balances.entry(asset.to_string()).or_insert(Decimal::ZERO) += amount;
    }

    fn debit(&self, asset: &str, amount: Decimal) -> Result<(), TradingError> {
        let mut balance = self.balances.entry(asset.to_string()).or_insert(Decimal::ZERO);
        if *balance < amount {
            return Err(TradingError::InsufficientFunds {
                asset: asset.to_string(),
                required: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        Ok(())
    }

    fn current_snapshot(&self) -> Arc<MarketSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn current_symbols(&self) -> Arc<SymbolSet> {
        self.symbols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn place_market_order(&self, order: &OrderRequest) -> Result<OrderFill, TradingError> {
        order.validate().map_err(TradingError::InvalidParams)?;

        let symbols = self.current_symbols();
        let symbol = symbols
            .get(&order.symbol)
            .ok_or_else(|| TradingError::OrderRejected {
                reason: format!("unknown symbol {}", order.symbol),
            })?;
        let snapshot = self.current_snapshot();
        let book = snapshot
            .book(&order.symbol)
            .ok_or_else(|| TradingError::OrderRejected {
                reason: format!("no market data for {}", order.symbol),
            })?;

        let amount = order.quantity.amount();
        let fill = estimate_fill(book.levels_for(order.side), order.side, amount, self.slippage_pct)
            .map_err(|e| TradingError::OrderRejected {
                reason: e.to_string(),
            })?;
        let fee_rate = self.fees.taker_fee(&order.symbol);

        let executed_qty = match order.quantity {
            OrderQuantity::Quote(quote) => {
                self.debit(&symbol.quote, quote)?;
                let base = quote / fill.price;
                self.credit(&symbol.base, base * (Decimal::ONE - fee_rate));
                base
            }
            OrderQuantity::Base(base) => {
                self.debit(&symbol.base, base)?;
                self.credit(&symbol.quote, base * fill.price * (Decimal::ONE - fee_rate));
                base
            }
        };

        let order_id = format!(
            "paper-{}",
            self.next_order_id.fetch_add(1, Ordering::Relaxed)
        );
        debug!(
            order_id = %order_id,
            symbol = %order.symbol,
            side = %order.side,
            executed_qty = %executed_qty,
            avg_price = %fill.price,
            "Paper order filled"
        );

        Ok(OrderFill {
            order_id,
            status: OrderStatus::Filled,
            executed_qty,
            avg_price: fill.price,
        })
    }

    async fn borrow(&self, asset: &str, amount: Decimal) -> Result<(), TradingError> {
        if amount <= Decimal::ZERO {
            return Err(TradingError::BorrowFailed {
                asset: asset.to_string(),
                reason: format!("invalid amount {amount}"),
            });
        }
        *self.loans.entry(asset.to_string()).or_insert(Decimal::ZERO) += amount;
        self.credit(asset, amount);
        info!(asset = %asset, amount = %amount, "Paper margin loan opened");
        Ok(())
    }

    async fn repay(&self, asset: &str, amount: Decimal) -> Result<(), TradingError> {
        if self.loan(asset) < amount {
            return Err(TradingError::RepayFailed {
                asset: asset.to_string(),
                reason: format!("repay {amount} exceeds loan {}", self.loan(asset)),
            });
        }
        self.debit(asset, amount).map_err(|e| TradingError::RepayFailed {
            asset: asset.to_string(),
            reason: e.to_string(),
        })?;
        if let Some(mut loan) = self.loans.get_mut(asset) {
            *loan -= amount;
        }
        info!(asset = %asset, amount = %amount, "Paper margin loan repaid");
        Ok(())
    }

    async fn available_capital(&self, asset: &str) -> Result<Decimal, TradingError> {
        Ok(self.balance(asset))
    }

    fn observe_snapshot(&self, snapshot: &Arc<MarketSnapshot>) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(snapshot);
    }

    fn observe_symbols(&self, symbols: &Arc<SymbolSet>) {
        *self.symbols.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(symbols);
    }
}
