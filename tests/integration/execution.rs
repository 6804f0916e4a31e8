//! Execution scenarios against the mock and paper exchanges.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use triangular_arb::arbitrage::{
    ExecutionCoordinator, ExecutionSettings, ExecutionStrategy, RollbackOutcome, Route,
};
use triangular_arb::error::{ExecutionError, TradingError};
use triangular_arb::market::{MockConfig, MockExchange};
use triangular_arb::trading::{Exchange, PaperExchange};

use super::{fees, triangle_books, triangle_snapshot, triangle_symbols};

fn settings() -> ExecutionSettings {
    ExecutionSettings {
        order_timeout: Duration::from_millis(100),
        retry_backoff: Duration::from_millis(1),
        ..Default::default()
    }
}

fn margin_settings() -> ExecutionSettings {
    ExecutionSettings {
        margin_enabled: true,
        margin_min_amount: dec!(50),
        ..settings()
    }
}

fn mock(config: MockConfig) -> MockExchange {
    let mock = MockExchange::with_config(config);
    for book in triangle_books() {
        mock.set_order_book(book);
    }
    mock.set_balance("USDT", dec!(1000));
    mock
}

fn route() -> Route {
    Route::cycle("USDT", &["BTC", "ETH"]).unwrap()
}

#[tokio::test]
async fn hop_failure_after_borrow_repays_the_loan() {
    let exchange = mock(MockConfig::default());
    exchange.fail_orders(
        "ETHBTC",
        10,
        TradingError::OrderRejected {
            reason: "MARKET_CLOSED".to_string(),
        },
    );
    let coordinator = ExecutionCoordinator::new(exchange.clone(), fees(), margin_settings());

    let result = coordinator
        .execute(&route(), dec!(100), &triangle_snapshot(), &triangle_symbols())
        .await;

    assert!(!result.success);
    assert_eq!(result.strategy, ExecutionStrategy::Margin);
    assert!(matches!(
        result.error,
        Some(ExecutionError::ExecutionFailed { hop: 1, .. })
    ));
    assert_eq!(exchange.borrows(), vec![("BTC".to_string(), dec!(0.002))]);
    assert_eq!(exchange.repays(), exchange.borrows());
    assert_eq!(
        result.rollback,
        RollbackOutcome::Repaid {
            asset: "BTC".to_string(),
            amount: dec!(0.002),
        }
    );
    assert_eq!(coordinator.stats().rollbacks, 1);
}

#[tokio::test]
async fn failed_repay_is_reported_not_raised() {
    let exchange = mock(MockConfig {
        fail_repay: Some("margin account locked".to_string()),
        ..Default::default()
    });
    exchange.fail_orders(
        "ETHUSDT",
        10,
        TradingError::OrderRejected {
            reason: "LOT_SIZE".to_string(),
        },
    );
    let coordinator = ExecutionCoordinator::new(exchange.clone(), fees(), margin_settings());

    let result = coordinator
        .execute(&route(), dec!(100), &triangle_snapshot(), &triangle_symbols())
        .await;

    assert!(!result.success);
    assert!(matches!(result.rollback, RollbackOutcome::Failed { .. }));
    assert!(matches!(
        result.error,
        Some(ExecutionError::RollbackFailed { .. })
    ));
    assert_eq!(exchange.repays().len(), 1);
}

#[tokio::test]
async fn transient_errors_are_retried_within_budget() {
    let exchange = mock(MockConfig::default());
    exchange.fail_orders(
        "BTCUSDT",
        2,
        TradingError::SubmissionFailed("502 Bad Gateway".to_string()),
    );
    let coordinator = ExecutionCoordinator::new(exchange.clone(), fees(), settings());

    let result = coordinator
        .execute(&route(), dec!(100), &triangle_snapshot(), &triangle_symbols())
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.orders[0].attempts, 3);
    assert_eq!(result.final_amount.round_dp(6), dec!(103.688312));
}

#[tokio::test]
async fn paper_exchange_runs_the_triangle() {
    let paper = Arc::new(PaperExchange::new(
        fees(),
        dec!(0.001),
        [("USDT".to_string(), dec!(1000))],
    ));
    paper.observe_snapshot(&Arc::new(triangle_snapshot()));
    paper.observe_symbols(&Arc::new(triangle_symbols()));
    let coordinator = ExecutionCoordinator::new(paper.clone(), fees(), settings());

    let result = coordinator
        .execute(&route(), dec!(100), &triangle_snapshot(), &triangle_symbols())
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.final_amount.round_dp(6), dec!(103.688312));
    assert_eq!(paper.balance("USDT").round_dp(6), dec!(1003.688312));
    assert_eq!(paper.balance("BTC"), dec!(0));
    assert_eq!(paper.balance("ETH"), dec!(0));
}

#[tokio::test]
async fn concurrent_executions_on_one_asset_are_serialized() {
    let exchange = mock(MockConfig {
        latency_ms: 5,
        ..Default::default()
    });
    let coordinator = Arc::new(ExecutionCoordinator::new(
        exchange.clone(),
        fees(),
        ExecutionSettings {
            max_concurrent: 3,
            ..settings()
        },
    ));
    let snapshot = triangle_snapshot();
    let symbols = triangle_symbols();
    let route = route();

    let (a, b) = tokio::join!(
        coordinator.execute(&route, dec!(100), &snapshot, &symbols),
        coordinator.execute(&route, dec!(100), &snapshot, &symbols),
    );

    assert!(a.success && b.success);
    let orders = exchange.orders();
    assert_eq!(orders.len(), 6);
    // The second execution starts only after the first finished all hops.
    let symbols_in_order: Vec<&str> = orders.iter().map(|o| o.symbol.as_str()).collect();
    assert_eq!(
        symbols_in_order,
        vec!["BTCUSDT", "ETHBTC", "ETHUSDT", "BTCUSDT", "ETHBTC", "ETHUSDT"]
    );
}
