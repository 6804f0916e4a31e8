//! Live public market data tests.
//!
//! These hit the exchange's public REST API and need network access.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use triangular_arb::arbitrage::{OpportunityScanner, RouteSimulator};
use triangular_arb::engine::ArbitrageEngine;
use triangular_arb::market::{BinanceClient, FeeSource, MarketDataSource};
use triangular_arb::risk::{LiquidityAnalyzer, RiskCalculator};
use triangular_arb::trading::PaperExchange;
use triangular_arb::Config;

/// Config from defaults plus any `.env` overrides.
fn test_config() -> Config {
    dotenvy::dotenv().ok();
    Config::from_vars(std::env::vars()).unwrap_or_else(|_| {
        Config::from_vars(std::iter::empty()).expect("defaults always deserialize")
    })
}

fn client(config: &Config) -> BinanceClient {
    BinanceClient::new(
        config.exchange_rest_url.clone(),
        Duration::from_millis(config.http_timeout_ms.max(5000)),
    )
    .unwrap()
}

#[tokio::test]
#[ignore = "requires network access"]
async fn test_exchange_metadata_and_depth() {
    let config = test_config();
    let client = client(&config);

    let symbols = client.exchange_symbols().await.unwrap();
    assert!(symbols.quoted_in(&config.base_asset).count() > 10);

    let book = client
        .order_book(&config.volatility_proxy_symbol, config.book_limit)
        .await
        .unwrap();
    assert!(!book.has_empty_side());
    assert!(book.bids.len() <= config.book_limit);

    println!(
        "{} symbols, {} best bid {:?}",
        symbols.len(),
        book.symbol,
        book.best_bid()
    );
}

#[tokio::test]
#[ignore = "requires network access"]
async fn test_single_detection_cycle() {
    let config = test_config();
    let fees: Arc<dyn FeeSource> = Arc::new(config.fee_table());
    let analyzer =
        || LiquidityAnalyzer::new(config.liquidity_settings(), fees.clone(), config.slippage_pct);
    let scanner = OpportunityScanner::new(
        config.scanner_settings(),
        RouteSimulator::new(fees.clone(), config.slippage_pct),
        analyzer(),
    );
    let risk = RiskCalculator::new(config.risk_settings(), analyzer());
    let engine: ArbitrageEngine<BinanceClient, Arc<PaperExchange>> =
        ArbitrageEngine::new(client(&config), scanner, risk, config.engine_settings());

    let report = engine
        .run_cycle(&Arc::new(AtomicBool::new(false)))
        .await
        .unwrap();

    assert!(report.books > 0);
    assert!(report.execution.is_none());
    println!(
        "{} books, {} evaluations, {} opportunities",
        report.books,
        report.routes_evaluated,
        report.evaluated.len()
    );
}
