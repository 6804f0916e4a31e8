//! Order book types and data structures.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::trading::Side;

/// Single price level in an order book.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceLevel {
    /// Price at this level.
    pub price: Decimal,
    /// Base quantity available at this price.
    pub quantity: Decimal,
}

impl PriceLevel {
    /// Create a new price level.
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }

    /// Quote value of the level.
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// L2 order book for one symbol.
#[derive(Debug, Clone)]
pub struct SymbolBook {
    /// Exchange symbol.
    pub symbol: String,
    /// Bid levels sorted by price descending.
    pub bids: Vec<PriceLevel>,
    /// Ask levels sorted by price ascending.
    pub asks: Vec<PriceLevel>,
    /// When this book was captured.
    pub updated_at: OffsetDateTime,
}

impl SymbolBook {
    /// Create a book, sorting both sides best-first.
    pub fn new(
        symbol: impl Into<String>,
        mut bids: Vec<PriceLevel>,
        mut asks: Vec<PriceLevel>,
        updated_at: OffsetDateTime,
    ) -> Self {
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        Self {
            symbol: symbol.into(),
            bids,
            asks,
            updated_at,
        }
    }

    /// Get the best bid price.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    /// Get the best ask price.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Levels consumed by a market order on `side`.
    pub fn levels_for(&self, side: Side) -> &[PriceLevel] {
        match side {
            Side::Buy => &self.asks,
            Side::Sell => &self.bids,
        }
    }

    /// Best price a market order on `side` would hit.
    pub fn best_price(&self, side: Side) -> Option<Decimal> {
        self.levels_for(side).first().map(|l| l.price)
    }

    /// Relative spread `(ask - bid) / bid`.
    pub fn spread_ratio(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) if bid > Decimal::ZERO => Some((ask - bid) / bid),
            _ => None,
        }
    }

    /// Mid price.
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// Total number of entries on both sides.
    pub fn entry_count(&self) -> usize {
        self.bids.len() + self.asks.len()
    }

    /// Whether either side has no levels.
    pub fn has_empty_side(&self) -> bool {
        self.bids.is_empty() || self.asks.is_empty()
    }

    /// Check if the book is inverted (best_ask < best_bid).
    pub fn is_inverted(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => ask < bid,
            _ => false,
        }
    }

    /// Base quantity of the top `levels` entries on both sides.
    pub fn top_depth(&self, levels: usize) -> Decimal {
        let bids: Decimal = self.bids.iter().take(levels).map(|l| l.quantity).sum();
        let asks: Decimal = self.asks.iter().take(levels).map(|l| l.quantity).sum();
        bids + asks
    }

    /// Quote value of the top `levels` entries on `side`'s book.
    pub fn top_notional(&self, side: Side, levels: usize) -> Decimal {
        self.levels_for(side)
            .iter()
            .take(levels)
            .map(PriceLevel::notional)
            .sum()
    }
}

/// Point-in-time collection of order books.
///
/// Read-only for the duration of a scan cycle.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    /// Books keyed by symbol.
    pub books: HashMap<String, SymbolBook>,
    /// When the snapshot was assembled.
    pub taken_at: OffsetDateTime,
}

impl Default for MarketSnapshot {
    fn default() -> Self {
        Self {
            books: HashMap::new(),
            taken_at: OffsetDateTime::now_utc(),
        }
    }
}

impl MarketSnapshot {
    /// Build a snapshot from books, stamped now.
    pub fn from_books(books: impl IntoIterator<Item = SymbolBook>) -> Self {
        Self {
            books: books.into_iter().map(|b| (b.symbol.clone(), b)).collect(),
            taken_at: OffsetDateTime::now_utc(),
        }
    }

    /// Look up a book.
    pub fn book(&self, symbol: &str) -> Option<&SymbolBook> {
        self.books.get(symbol)
    }

    /// Add or replace a book.
    pub fn insert(&mut self, book: SymbolBook) {
        self.books.insert(book.symbol.clone(), book);
    }

    /// Merge another snapshot's books into this one.
    pub fn merge(&mut self, other: MarketSnapshot) {
        self.books.extend(other.books);
    }

    /// Age of a book relative to the snapshot time.
    pub fn age_of(&self, symbol: &str) -> Option<time::Duration> {
        self.book(symbol).map(|b| self.taken_at - b.updated_at)
    }

    /// Number of books.
    pub fn len(&self) -> usize {
        self.books.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}
