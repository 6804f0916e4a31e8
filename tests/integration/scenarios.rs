//! Detection scenarios: simulation, scanning and liquidity checks.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use triangular_arb::arbitrage::{OpportunityScanner, Route, RouteSimulator, ScannerSettings};
use triangular_arb::market::{
    FeeTable, MarketConditions, MarketView, MockOrderBookBuilder, Symbol, SymbolSet,
};
use triangular_arb::orderbook::MarketSnapshot;
use triangular_arb::risk::{LiquidityAnalyzer, LiquiditySettings};

use super::{expected_triangle_final, fees, triangle_books, triangle_snapshot, triangle_symbols};

fn scanner(settings: ScannerSettings) -> OpportunityScanner {
    OpportunityScanner::new(
        settings,
        RouteSimulator::new(fees(), dec!(0.001)),
        LiquidityAnalyzer::new(LiquiditySettings::default(), fees(), dec!(0.001)),
    )
}

fn assets() -> Vec<String> {
    vec!["BTC".to_string(), "ETH".to_string()]
}

#[test]
fn triangle_matches_hand_computed_amounts() {
    let simulator = RouteSimulator::new(fees(), dec!(0.001));
    let route = Route::cycle("USDT", &["BTC", "ETH"]).unwrap();

    let result = simulator.simulate(&route, dec!(100), &triangle_snapshot(), &triangle_symbols());

    assert!(result.feasible, "{:?}", result.failure);
    assert_eq!(result.hops.len(), 3);
    assert_eq!(result.final_amount.round_dp(6), expected_triangle_final().round_dp(6));
    assert_eq!(result.final_amount.round_dp(6), dec!(103.688312));
}

#[test]
fn reverse_orientation_loses_money() {
    let simulator = RouteSimulator::new(fees(), dec!(0.001));
    let route = Route::cycle("USDT", &["BTC", "ETH"]).unwrap().reversed();

    let result = simulator.simulate(&route, dec!(100), &triangle_snapshot(), &triangle_symbols());

    assert!(result.feasible);
    assert!(result.final_amount < dec!(100));
}

#[test]
fn higher_fee_on_one_hop_lowers_the_final_amount() {
    let route = Route::cycle("USDT", &["BTC", "ETH"]).unwrap();
    let cheap = RouteSimulator::new(fees(), dec!(0.001));
    let dear = RouteSimulator::new(
        std::sync::Arc::new(FeeTable::default().with_override("ETHBTC", dec!(0.002), dec!(0.002))),
        dec!(0.001),
    );

    let base = cheap.simulate(&route, dec!(100), &triangle_snapshot(), &triangle_symbols());
    let costly = dear.simulate(&route, dec!(100), &triangle_snapshot(), &triangle_symbols());

    assert!(costly.final_amount < base.final_amount);
}

#[test]
fn scan_finds_only_the_profitable_orientation() {
    let scanner = scanner(ScannerSettings::default());

    let found = scanner.scan(
        &assets(),
        &[dec!(100)],
        &triangle_snapshot(),
        &triangle_symbols(),
    );

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].route.to_string(), "USDT -> BTC -> ETH -> USDT");
    assert_eq!(found[0].final_amount.round_dp(6), dec!(103.688312));
}

#[test]
fn net_gain_equal_to_threshold_is_excluded() {
    let net_gain = expected_triangle_final() / dec!(100) - Decimal::ONE;

    let at = scanner(ScannerSettings {
        profit_threshold: net_gain,
        ..Default::default()
    });
    let below = scanner(ScannerSettings {
        profit_threshold: net_gain - dec!(0.000001),
        ..Default::default()
    });

    let snapshot = triangle_snapshot();
    let symbols = triangle_symbols();
    assert!(at.scan(&assets(), &[dec!(100)], &snapshot, &symbols).is_empty());
    assert_eq!(
        below.scan(&assets(), &[dec!(100)], &snapshot, &symbols).len(),
        1
    );
}

#[test]
fn scan_is_idempotent() {
    let snapshot = triangle_snapshot();
    let symbols = triangle_symbols();
    let amounts = [dec!(10), dec!(25), dec!(50)];

    let key = |s: &OpportunityScanner| {
        s.scan(&assets(), &amounts, &snapshot, &symbols)
            .into_iter()
            .map(|o| (o.route.to_string(), o.amount, o.final_amount, o.priority))
            .collect::<Vec<_>>()
    };

    let first = scanner(ScannerSettings::default());
    let second = scanner(ScannerSettings::default());

    let a = key(&first);
    let b = key(&first);
    let c = key(&second);
    assert!(!a.is_empty());
    assert_eq!(a, b);
    assert_eq!(a, c);
    assert_eq!(first.stats().scans, 2);
    assert_eq!(first.stats().cache_hits, 0);
}

#[test]
fn rescanning_a_changed_book_drops_the_old_opportunity() {
    let scanner = scanner(ScannerSettings::default());
    let symbols = triangle_symbols();
    assert_eq!(
        scanner.scan(&assets(), &[dec!(100)], &triangle_snapshot(), &symbols).len(),
        1
    );

    let mut books = triangle_books();
    books[1] = MockOrderBookBuilder::new("ETHBTC").build();
    let drained = MarketSnapshot::from_books(books);

    assert!(scanner.scan(&assets(), &[dec!(100)], &drained, &symbols).is_empty());
}

#[test]
fn empty_book_makes_route_infeasible_and_unscanned() {
    let mut books = triangle_books();
    books[1] = MockOrderBookBuilder::new("ETHBTC")
        .bid(dec!(0.0499), dec!(1000))
        .build();
    let snapshot = MarketSnapshot::from_books(books);
    let symbols = triangle_symbols();

    let route = Route::cycle("USDT", &["BTC", "ETH"]).unwrap();
    let result = RouteSimulator::new(fees(), dec!(0.001)).simulate(
        &route,
        dec!(100),
        &snapshot,
        &symbols,
    );
    assert!(!result.feasible);
    assert!(result.failure.is_some());
    assert_eq!(result.final_amount, Decimal::ZERO);

    let found = scanner(ScannerSettings::default()).scan(&assets(), &[dec!(100)], &snapshot, &symbols);
    assert!(found.iter().all(|o| o.route != route));
}

#[test]
fn missing_symbol_is_infeasible_without_panic() {
    let symbols = SymbolSet::new([Symbol::new("BTC", "USDT"), Symbol::new("ETH", "USDT")]);
    let route = Route::cycle("USDT", &["BTC", "ETH"]).unwrap();

    let result = RouteSimulator::new(fees(), dec!(0.001)).simulate(
        &route,
        dec!(100),
        &triangle_snapshot(),
        &symbols,
    );

    assert!(!result.feasible);
}

#[test]
fn slippage_above_tolerance_is_not_viable() {
    let book = MockOrderBookBuilder::new("BTCUSDT")
        .ask(dec!(100), dec!(0.5))
        .ask(dec!(101.2), dec!(10))
        .ask(dec!(101.3), dec!(10))
        .ask(dec!(101.4), dec!(10))
        .ask(dec!(101.5), dec!(10))
        .bid(dec!(99.9), dec!(10))
        .bid(dec!(99.8), dec!(10))
        .bid(dec!(99.7), dec!(10))
        .bid(dec!(99.6), dec!(10))
        .bid(dec!(99.5), dec!(10))
        .build();
    let snapshot = MarketSnapshot::from_books([book]);
    let symbols = SymbolSet::new([Symbol::new("BTC", "USDT")]);
    let conditions = MarketConditions::default();
    let analyzer = LiquidityAnalyzer::new(
        LiquiditySettings {
            slippage_tolerance: dec!(0.005),
            ..Default::default()
        },
        fees(),
        dec!(0.001),
    );

    let route = Route::new(["USDT", "BTC", "USDT"]).unwrap();
    let report = analyzer.liquidity_check(
        &route,
        dec!(100),
        MarketView::new(&snapshot, &symbols, &conditions),
    );

    assert!(report.total_slippage > dec!(0.005));
    assert!(report.total_slippage < dec!(0.007));
    assert!(!report.viable);
    assert!(report.reasons.iter().any(|r| r.contains("slippage")));
}
