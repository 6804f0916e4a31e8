//! Trading module for orders and exchange access.
//!
//! This module handles:
//! - Order types and fills
//! - The exchange abstraction
//! - Paper trading for dry runs

pub mod exchange;
pub mod order;
pub mod paper;

pub use exchange::Exchange;
pub use order::{OrderFill, OrderQuantity, OrderRequest, OrderResult, OrderStatus, Side};
pub use paper::PaperExchange;
