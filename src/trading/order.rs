//! Order types and creation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order.
    #[strum(serialize = "BUY", serialize = "buy")]
    Buy,
    /// Sell order.
    #[strum(serialize = "SELL", serialize = "sell")]
    Sell,
}

/// Quantity of a market order.
///
/// Market buys on a route spend a known amount of the quote asset, while
/// market sells dispose of a known amount of the base asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderQuantity {
    /// Base asset quantity.
    Base(Decimal),
    /// Quote asset amount to spend.
    Quote(Decimal),
}

impl OrderQuantity {
    /// Raw amount regardless of denomination.
    pub fn amount(&self) -> Decimal {
        match self {
            OrderQuantity::Base(q) | OrderQuantity::Quote(q) => *q,
        }
    }
}

/// Market order parameters for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    /// Exchange symbol, e.g. `ETHBTC`.
    pub symbol: String,
    /// Order side.
    pub side: Side,
    /// Order size.
    pub quantity: OrderQuantity,
}

impl OrderRequest {
    /// Market buy spending `quote_amount` of the quote asset.
    pub fn buy(symbol: impl Into<String>, quote_amount: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side: Side::Buy,
            quantity: OrderQuantity::Quote(quote_amount),
        }
    }

    /// Market sell of `base_quantity`.
    pub fn sell(symbol: impl Into<String>, base_quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side: Side::Sell,
            quantity: OrderQuantity::Base(base_quantity),
        }
    }

    /// Validate order parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.symbol.is_empty() {
            return Err("symbol is required".to_string());
        }
        if self.quantity.amount() <= Decimal::ZERO {
            return Err("quantity must be positive".to_string());
        }
        Ok(())
    }
}

/// Order status from the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Accepted, not yet matched.
    #[strum(serialize = "NEW", serialize = "new")]
    New,
    /// Partially matched.
    #[strum(serialize = "PARTIALLY_FILLED", serialize = "partially_filled")]
    PartiallyFilled,
    /// Fully matched.
    #[strum(serialize = "FILLED", serialize = "filled")]
    Filled,
    /// Cancelled.
    #[strum(serialize = "CANCELED", serialize = "CANCELLED", serialize = "canceled")]
    Canceled,
    /// Rejected.
    #[strum(serialize = "REJECTED", serialize = "rejected")]
    Rejected,
    /// Expired without a complete fill.
    #[strum(serialize = "EXPIRED", serialize = "expired")]
    Expired,
}

impl OrderStatus {
    /// Check if status is terminal (won't change).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    /// Check if order was filled.
    pub fn is_filled(&self) -> bool {
        matches!(self, OrderStatus::Filled)
    }
}

/// Exchange acknowledgement of a market order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFill {
    /// Exchange order ID.
    pub order_id: String,
    /// Final status.
    pub status: OrderStatus,
    /// Executed base quantity.
    pub executed_qty: Decimal,
    /// Average fill price (quote per base).
    pub avg_price: Decimal,
}

impl OrderFill {
    /// Amount of the target asset received, before fees.
    pub fn received(&self, side: Side) -> Decimal {
        match side {
            Side::Buy => self.executed_qty,
            Side::Sell => self.executed_qty * self.avg_price,
        }
    }
}

/// Per-hop record kept in an execution result.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderResult {
    /// Zero-based hop index.
    pub hop: usize,
    /// Symbol traded.
    pub symbol: String,
    /// Order side.
    pub side: Side,
    /// Requested quantity.
    pub requested: OrderQuantity,
    /// Whether the hop completed.
    pub success: bool,
    /// Exchange order ID when one was assigned.
    pub order_id: Option<String>,
    /// Executed base quantity.
    pub executed_qty: Decimal,
    /// Average fill price.
    pub avg_price: Decimal,
    /// Price expected from the book at decision time.
    pub expected_price: Decimal,
    /// Realised slippage against the expected price.
    pub slippage: Decimal,
    /// Amount received after fees.
    pub amount_out: Decimal,
    /// Fee charged, in units of the received asset.
    pub fee: Decimal,
    /// Submission attempts made.
    pub attempts: u32,
    /// Error description on failure.
    pub error: Option<String>,
}
