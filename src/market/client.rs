//! Public REST market-data client.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, instrument};

use super::source::MarketDataSource;
use super::types::{Symbol, SymbolSet, Ticker24h};
use crate::error::MarketError;
use crate::orderbook::{PriceLevel, SymbolBook};

/// Depth limits the depth endpoint accepts.
const DEPTH_LIMITS: [usize; 8] = [5, 10, 20, 50, 100, 500, 1000, 5000];

/// Exchange info response.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfoResponse {
    /// Listed symbols.
    pub symbols: Vec<SymbolInfo>,
}

/// One listed symbol.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    /// Exchange symbol.
    pub symbol: String,
    /// Trading status, `TRADING` when open.
    pub status: String,
    /// Base asset.
    pub base_asset: String,
    /// Quote asset.
    pub quote_asset: String,
    /// Trading filters.
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

/// Trading filters we act on. Others are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    /// Quantity step and minimum.
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize {
        /// Quantity step.
        step_size: Decimal,
        /// Minimum quantity.
        min_qty: Decimal,
    },
    /// Price tick.
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    PriceFilter {
        /// Price tick.
        tick_size: Decimal,
    },
    /// Minimum notional.
    #[serde(rename = "NOTIONAL", alias = "MIN_NOTIONAL", rename_all = "camelCase")]
    Notional {
        /// Minimum order notional in quote.
        min_notional: Decimal,
    },
    /// Anything else.
    #[serde(other)]
    Other,
}

/// Depth response; levels are `[price, quantity]` string pairs.
#[derive(Debug, Clone, Deserialize)]
pub struct DepthResponse {
    /// Bid levels.
    pub bids: Vec<(Decimal, Decimal)>,
    /// Ask levels.
    pub asks: Vec<(Decimal, Decimal)>,
}

/// 24h ticker response entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerResponse {
    /// Exchange symbol.
    pub symbol: String,
    /// 24h price change in percent.
    pub price_change_percent: Decimal,
    /// Last traded price.
    pub last_price: Decimal,
    /// Base volume.
    pub volume: Decimal,
    /// Quote volume.
    pub quote_volume: Decimal,
}

impl From<SymbolInfo> for Symbol {
    fn from(info: SymbolInfo) -> Self {
        let mut symbol = Symbol::new(info.base_asset, info.quote_asset);
        symbol.name = info.symbol;
        symbol.tradable = info.status == "TRADING";
        for filter in info.filters {
            match filter {
                SymbolFilter::LotSize { step_size, min_qty } => {
                    symbol.step_size = step_size;
                    symbol.min_qty = min_qty;
                }
                SymbolFilter::PriceFilter { tick_size } => symbol.tick_size = tick_size,
                SymbolFilter::Notional { min_notional } => symbol.min_notional = min_notional,
                SymbolFilter::Other => {}
            }
        }
        symbol
    }
}

impl From<TickerResponse> for Ticker24h {
    fn from(t: TickerResponse) -> Self {
        Self {
            symbol: t.symbol,
            price_change_pct: t.price_change_percent,
            last_price: t.last_price,
            volume: t.volume,
            quote_volume: t.quote_volume,
        }
    }
}

/// Smallest accepted depth limit covering `depth`.
pub fn depth_limit(depth: usize) -> usize {
    DEPTH_LIMITS
        .iter()
        .copied()
        .find(|&limit| limit >= depth)
        .unwrap_or(DEPTH_LIMITS[DEPTH_LIMITS.len() - 1])
}

/// Unauthenticated client for the spot REST API.
#[derive(Debug, Clone)]
pub struct BinanceClient {
    /// HTTP client for API requests.
    http: reqwest::Client,
    /// Base URL, without trailing slash.
    base_url: String,
}

impl BinanceClient {
    /// Create a client for `base_url` with a per-request `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, MarketError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_millis(500))
            // TCP_NODELAY for low-latency (disable Nagle's algorithm)
            .tcp_nodelay(true)
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Base URL in use.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, MarketError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.get(&url).query(query).send().await?;

        if !response.status().is_success() {
            return Err(MarketError::FetchFailed {
                symbol: path.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        response
            .json()
            .await
            .map_err(|e| MarketError::ParseError(format!("{path}: {e}")))
    }
}

#[async_trait]
impl MarketDataSource for BinanceClient {
    #[instrument(skip(self))]
    async fn exchange_symbols(&self) -> Result<SymbolSet, MarketError> {
        let info: ExchangeInfoResponse = self.get_json("/api/v3/exchangeInfo", &[]).await?;
        let symbols = SymbolSet::new(info.symbols.into_iter().map(Symbol::from));
        if symbols.is_empty() {
            return Err(MarketError::NoSymbols);
        }
        debug!(symbols = symbols.len(), "Loaded exchange info");
        Ok(symbols)
    }

    #[instrument(skip(self), level = "debug")]
    async fn order_book(&self, symbol: &str, depth: usize) -> Result<SymbolBook, MarketError> {
        let response: DepthResponse = self
            .get_json(
                "/api/v3/depth",
                &[
                    ("symbol", symbol.to_string()),
                    ("limit", depth_limit(depth).to_string()),
                ],
            )
            .await
            .map_err(|e| match e {
                MarketError::FetchFailed { reason, .. } => MarketError::FetchFailed {
                    symbol: symbol.to_string(),
                    reason,
                },
                other => other,
            })?;

        Ok(convert_depth(symbol, response, depth))
    }

    #[instrument(skip(self))]
    async fn market_tickers(&self) -> Result<Vec<Ticker24h>, MarketError> {
        let tickers: Vec<TickerResponse> = self.get_json("/api/v3/ticker/24hr", &[]).await?;
        Ok(tickers.into_iter().map(Ticker24h::from).collect())
    }
}

/// Convert a depth response, dropping empty levels and keeping `depth` per side.
fn convert_depth(symbol: &str, response: DepthResponse, depth: usize) -> SymbolBook {
    let parse_levels = |levels: Vec<(Decimal, Decimal)>| -> Vec<PriceLevel> {
        levels
            .into_iter()
            .filter(|(_, quantity)| *quantity > Decimal::ZERO)
            .take(depth)
            .map(|(price, quantity)| PriceLevel::new(price, quantity))
            .collect()
    };

    SymbolBook::new(
        symbol,
        parse_levels(response.bids),
        parse_levels(response.asks),
        OffsetDateTime::now_utc(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn depth_limit_rounds_up() {
        assert_eq!(depth_limit(1), 5);
        assert_eq!(depth_limit(10), 10);
        assert_eq!(depth_limit(15), 20);
        assert_eq!(depth_limit(10_000), 5000);
    }

    #[test]
    fn parses_exchange_info_filters() {
        let json = r#"{
            "symbols": [{
                "symbol": "ETHBTC",
                "status": "TRADING",
                "baseAsset": "ETH",
                "quoteAsset": "BTC",
                "filters": [
                    {"filterType": "PRICE_FILTER", "minPrice": "0.00001", "maxPrice": "922327", "tickSize": "0.00001"},
                    {"filterType": "LOT_SIZE", "minQty": "0.0001", "maxQty": "100000", "stepSize": "0.0001"},
                    {"filterType": "ICEBERG_PARTS", "limit": 10},
                    {"filterType": "NOTIONAL", "minNotional": "0.0001", "applyMinToMarket": true}
                ]
            }, {
                "symbol": "LUNABTC",
                "status": "BREAK",
                "baseAsset": "LUNA",
                "quoteAsset": "BTC",
                "filters": []
            }]
        }"#;

        let info: ExchangeInfoResponse = serde_json::from_str(json).unwrap();
        let symbols: Vec<Symbol> = info.symbols.into_iter().map(Symbol::from).collect();

        assert_eq!(symbols[0].name, "ETHBTC");
        assert!(symbols[0].tradable);
        assert_eq!(symbols[0].step_size, dec!(0.0001));
        assert_eq!(symbols[0].min_qty, dec!(0.0001));
        assert_eq!(symbols[0].tick_size, dec!(0.00001));
        assert_eq!(symbols[0].min_notional, dec!(0.0001));
        assert!(!symbols[1].tradable);

        let set = SymbolSet::new(symbols);
        assert!(set.contains("ETHBTC"));
        assert!(!set.contains("LUNABTC"));
    }

    #[test]
    fn parses_depth_and_drops_empty_levels() {
        let json = r#"{
            "lastUpdateId": 1027024,
            "bids": [["4.00000000", "431.00000000"], ["3.90000000", "0.00000000"]],
            "asks": [["4.00000200", "12.00000000"], ["4.10000000", "3.00000000"]]
        }"#;

        let response: DepthResponse = serde_json::from_str(json).unwrap();
        let book = convert_depth("BNBBTC", response, 1);

        assert_eq!(book.bids.len(), 1);
        assert_eq!(book.asks.len(), 1);
        assert_eq!(book.best_bid(), Some(dec!(4)));
        assert_eq!(book.asks[0].quantity, dec!(12));
    }

    #[test]
    fn parses_tickers() {
        let json = r#"[{
            "symbol": "BTCUSDT",
            "priceChange": "-94.99999800",
            "priceChangePercent": "-95.960",
            "lastPrice": "4.00000200",
            "volume": "8913.30000000",
            "quoteVolume": "15.30000000"
        }]"#;

        let tickers: Vec<TickerResponse> = serde_json::from_str(json).unwrap();
        let ticker = Ticker24h::from(tickers[0].clone());

        assert_eq!(ticker.symbol, "BTCUSDT");
        assert_eq!(ticker.price_change_pct, dec!(-95.96));
        assert_eq!(ticker.quote_volume, dec!(15.3));
    }

    #[test]
    fn client_creation_works() {
        let client = BinanceClient::new("https://api.binance.com/", Duration::from_secs(2)).unwrap();
        assert_eq!(client.base_url(), "https://api.binance.com");
    }

    #[tokio::test]
    #[ignore = "hits the live exchange"]
    async fn live_exchange_info() {
        let client = BinanceClient::new("https://api.binance.com", Duration::from_secs(5)).unwrap();
        let symbols = client.exchange_symbols().await.unwrap();
        assert!(symbols.contains("BTCUSDT"));

        let book = client.order_book("BTCUSDT", 10).await.unwrap();
        assert!(!book.has_empty_side());
    }
}
