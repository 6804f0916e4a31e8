//! Unified error types for the arbitrage engine.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::arbitrage::lifecycle::RouteState;
use crate::trading::Side;

/// Unified error type for the arbitrage engine.
#[derive(Error, Debug)]
pub enum BotError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Configuration validation error.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Market data error.
    #[error("market error: {0}")]
    Market(#[from] MarketError),

    /// Route evaluation error.
    #[error("arbitrage error: {0}")]
    Arbitrage(#[from] ArbitrageError),

    /// Exchange/order error.
    #[error("trading error: {0}")]
    Trading(#[from] TradingError),

    /// Route execution error.
    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// HTTP request error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Background task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Market data errors.
#[derive(Error, Debug)]
pub enum MarketError {
    /// Failed to fetch data for a symbol.
    #[error("failed to fetch {symbol}: {reason}")]
    FetchFailed {
        /// Symbol or endpoint that failed.
        symbol: String,
        /// Reason for failure.
        reason: String,
    },

    /// The exchange returned no tradable symbols.
    #[error("exchange metadata contains no tradable symbols")]
    NoSymbols,

    /// Failed to parse market data.
    #[error("failed to parse market data: {0}")]
    ParseError(String),

    /// HTTP request failed.
    #[error("http request failed: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Pricing, simulation and route evaluation errors.
///
/// These are expected outcomes during a scan and are reported inside
/// simulation results rather than propagated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArbitrageError {
    /// Not enough liquidity in the order book.
    #[error("insufficient liquidity: need {required}, available {available}")]
    InsufficientLiquidity {
        /// Required size.
        required: Decimal,
        /// Available size.
        available: Decimal,
    },

    /// Invalid order size.
    #[error("invalid order size: {0}")]
    InvalidSize(Decimal),

    /// No tradable pair exists for a leg in either orientation.
    #[error("no tradable symbol for {from} -> {to}")]
    SymbolNotFound {
        /// Asset being sold.
        from: String,
        /// Asset being bought.
        to: String,
    },

    /// Order book missing from the snapshot.
    #[error("no order book for {symbol}")]
    MissingBook {
        /// Symbol without a book.
        symbol: String,
    },

    /// The book side needed for a hop is empty.
    #[error("{side} side of {symbol} is empty")]
    EmptyBookSide {
        /// Symbol with an empty side.
        symbol: String,
        /// Order side that would consume the book.
        side: Side,
    },

    /// Route shape is invalid.
    #[error("invalid route: {0}")]
    InvalidRoute(String),

    /// Running amount collapsed at a hop.
    #[error("amount became non-positive at hop {hop}")]
    NonPositiveAmount {
        /// Zero-based hop index.
        hop: usize,
    },

    /// Book is older than the configured bound.
    #[error("stale order book for {symbol}: {age_ms}ms old")]
    StaleData {
        /// Stale symbol.
        symbol: String,
        /// Age in milliseconds.
        age_ms: i64,
    },

    /// Lifecycle transition not permitted.
    #[error("invalid lifecycle transition {from} -> {to}")]
    InvalidTransition {
        /// Current state.
        from: RouteState,
        /// Requested state.
        to: RouteState,
    },

    /// Scan cancelled by shutdown.
    #[error("scan cancelled")]
    Cancelled,
}

/// Errors returned by exchange collaborators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TradingError {
    /// Order submission failed (network, 5xx).
    #[error("order submission failed: {0}")]
    SubmissionFailed(String),

    /// Order rejected by the exchange.
    #[error("order rejected: {reason}")]
    OrderRejected {
        /// Rejection reason from the exchange.
        reason: String,
    },

    /// Rate limited by the API.
    #[error("rate limited: retry after {retry_after_seconds}s")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_seconds: u64,
    },

    /// Insufficient funds for the order.
    #[error("insufficient {asset} funds: need {required}, have {available}")]
    InsufficientFunds {
        /// Asset being spent.
        asset: String,
        /// Required amount.
        required: Decimal,
        /// Available amount.
        available: Decimal,
    },

    /// Invalid order parameters.
    #[error("invalid order parameters: {0}")]
    InvalidParams(String),

    /// Order did not complete before the deadline.
    #[error("order on {symbol} timed out after {timeout_ms}ms")]
    Timeout {
        /// Symbol of the order.
        symbol: String,
        /// Deadline in milliseconds.
        timeout_ms: u64,
    },

    /// Margin loan request failed.
    #[error("borrow {asset} failed: {reason}")]
    BorrowFailed {
        /// Asset being borrowed.
        asset: String,
        /// Reason for failure.
        reason: String,
    },

    /// Margin repayment failed.
    #[error("repay {asset} failed: {reason}")]
    RepayFailed {
        /// Asset being repaid.
        asset: String,
        /// Reason for failure.
        reason: String,
    },
}

impl TradingError {
    /// Whether resubmitting the same order may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TradingError::SubmissionFailed(_) | TradingError::RateLimited { .. }
        )
    }
}

/// Route execution failures surfaced to the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    /// Route or amount rejected before any order was placed.
    #[error("validation failed for {route}: {reason}")]
    ValidationFailed {
        /// Route description.
        route: String,
        /// Reason for rejection.
        reason: String,
    },

    /// A hop failed after retries, timed out or slipped too far.
    #[error("execution of {route} ({amount}) failed at hop {hop} on {symbol}: {reason}")]
    ExecutionFailed {
        /// Route description.
        route: String,
        /// Initial amount.
        amount: Decimal,
        /// Zero-based hop index.
        hop: usize,
        /// Symbol traded at the failing hop.
        symbol: String,
        /// Underlying error.
        reason: String,
    },

    /// Margin principal could not be borrowed.
    #[error("borrow of {amount} {asset} failed: {reason}")]
    BorrowFailed {
        /// Asset requested.
        asset: String,
        /// Amount requested.
        amount: Decimal,
        /// Underlying error.
        reason: String,
    },

    /// Compensating repayment failed; needs operator attention.
    #[error("ROLLBACK FAILED: repay of {amount} {asset} failed: {reason}")]
    RollbackFailed {
        /// Borrowed asset.
        asset: String,
        /// Outstanding principal.
        amount: Decimal,
        /// Underlying error.
        reason: String,
    },
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, BotError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn retryable_errors() {
        assert!(TradingError::SubmissionFailed("502".into()).is_retryable());
        assert!(TradingError::RateLimited { retry_after_seconds: 1 }.is_retryable());
        assert!(!TradingError::OrderRejected { reason: "LOT_SIZE".into() }.is_retryable());
        assert!(!TradingError::Timeout { symbol: "BTCUSDT".into(), timeout_ms: 10 }.is_retryable());
    }

    #[test]
    fn execution_error_carries_context() {
        let err = ExecutionError::ExecutionFailed {
            route: "USDT -> BTC -> ETH -> USDT".into(),
            amount: dec!(100),
            hop: 1,
            symbol: "ETHBTC".into(),
            reason: "rejected".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("hop 1"));
        assert!(msg.contains("ETHBTC"));
        assert!(msg.contains("100"));
    }
}
