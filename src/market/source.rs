//! Market data source abstraction.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, instrument};

use super::types::{SymbolSet, Ticker24h};
use crate::error::MarketError;
use crate::metrics;
use crate::orderbook::{MarketSnapshot, SymbolBook};

/// Read-only view of an exchange's public market data.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// All symbols with their trading filters.
    async fn exchange_symbols(&self) -> Result<SymbolSet, MarketError>;

    /// L2 book for `symbol`, at most `depth` levels per side.
    async fn order_book(&self, symbol: &str, depth: usize) -> Result<SymbolBook, MarketError>;

    /// 24h statistics for every symbol.
    async fn market_tickers(&self) -> Result<Vec<Ticker24h>, MarketError>;
}

/// Fetch books for `symbols` with at most `concurrency` requests in flight.
///
/// Symbols whose fetch fails are left out of the snapshot; routes through them
/// become infeasible downstream.
#[instrument(skip(source, symbols), fields(symbols = symbols.len()))]
pub async fn fetch_snapshot<S>(
    source: &S,
    symbols: &[String],
    depth: usize,
    concurrency: usize,
) -> MarketSnapshot
where
    S: MarketDataSource + ?Sized,
{
    let books: Vec<SymbolBook> = stream::iter(symbols.iter())
        .map(|symbol| async move {
            let _timer = metrics::timer_orderbook_fetch();
            match source.order_book(symbol, depth).await {
                Ok(book) => Some(book),
                Err(e) => {
                    debug!(symbol = %symbol, error = %e, "Order book fetch failed");
                    metrics::inc_orderbook_fetch_errors(symbol);
                    None
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|book| async move { book })
        .collect()
        .await;

    MarketSnapshot::from_books(books)
}
