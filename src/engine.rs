//! Scan cycle orchestration.
//!
//! One cycle fetches a market snapshot, scans it on a blocking worker,
//! evaluates every opportunity and, when an execution coordinator is
//! attached, executes the best accepted one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::arbitrage::{
    ExecutionCoordinator, ExecutionResult, ExecutorStats, Opportunity, OpportunityScanner,
    RouteLifecycle, RouteState, ScannerStats,
};
use crate::error::BotError;
use crate::market::{fetch_snapshot, MarketConditions, MarketDataSource, MarketView, SymbolSet};
use crate::metrics;
use crate::orderbook::MarketSnapshot;
use crate::risk::{RiskCalculator, RiskMetrics, RiskSummary};
use crate::trading::Exchange;

/// Settings for cycle orchestration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Asset every cycle starts and ends in.
    pub base_asset: String,
    /// Trial amounts scanned each cycle.
    pub trial_amounts: Vec<Decimal>,
    /// Pairs quoted in the base asset kept by 24h quote volume.
    pub top_n_pairs: usize,
    /// Book levels fetched per side.
    pub book_limit: usize,
    /// Book requests in flight.
    pub fetch_concurrency: usize,
    /// How often symbol metadata is reloaded.
    pub symbol_refresh: Duration,
    /// Symbol whose 24h statistics gauge market conditions.
    pub volatility_proxy: String,
    /// Capital assumed when the exchange cannot report a balance.
    pub capital: Decimal,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            base_asset: "USDT".to_string(),
            trial_amounts: vec![dec!(10), dec!(25), dec!(50)],
            top_n_pairs: 50,
            book_limit: 10,
            fetch_concurrency: 10,
            symbol_refresh: Duration::from_secs(3600),
            volatility_proxy: "BTCUSDT".to_string(),
            capital: dec!(1000),
        }
    }
}

/// Cumulative engine counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStats {
    /// Cycles completed.
    pub cycles: u64,
    /// Cycles that ended in an error.
    pub failed_cycles: u64,
    /// Opportunities found by the scanner.
    pub opportunities_detected: u64,
    /// Opportunities accepted by the risk evaluator.
    pub opportunities_accepted: u64,
    /// Opportunities rejected by the risk evaluator.
    pub opportunities_rejected: u64,
    /// Executions attempted.
    pub executions: u64,
    /// Duration of the last completed cycle in milliseconds.
    pub last_cycle_ms: f64,
}

/// Opportunity with its risk assessment.
#[derive(Debug, Clone)]
pub struct EvaluatedOpportunity {
    /// Scanner output.
    pub opportunity: Opportunity,
    /// Risk assessment.
    pub metrics: RiskMetrics,
    /// States visited.
    pub lifecycle: RouteLifecycle,
}

impl EvaluatedOpportunity {
    /// Whether the evaluator accepted it.
    pub fn accepted(&self) -> bool {
        self.lifecycle.history().contains(&RouteState::Accepted)
    }
}

/// Outcome of one cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Ranked, evaluated opportunities.
    pub evaluated: Vec<EvaluatedOpportunity>,
    /// Route and amount pairs the scanner evaluated.
    pub routes_evaluated: u64,
    /// Books in the cycle's snapshot.
    pub books: usize,
    /// Cycle stopped early on shutdown.
    pub cancelled: bool,
    /// Execution of the best accepted opportunity, if any.
    pub execution: Option<ExecutionResult>,
    /// Wall time.
    pub elapsed: Duration,
}

impl CycleReport {
    /// Number of accepted opportunities.
    pub fn accepted(&self) -> usize {
        self.evaluated.iter().filter(|e| e.accepted()).count()
    }

    /// Number of rejected opportunities.
    pub fn rejected(&self) -> usize {
        self.evaluated.len() - self.accepted()
    }
}

struct CachedSymbols {
    symbols: Arc<SymbolSet>,
    loaded: Instant,
}

/// Market data, scanner, risk evaluator and an optional executor wired together.
pub struct ArbitrageEngine<M, E> {
    market: M,
    scanner: Arc<OpportunityScanner>,
    risk: RiskCalculator,
    executor: Option<ExecutionCoordinator<E>>,
    settings: EngineSettings,
    symbols: Mutex<Option<CachedSymbols>>,
    stats: Mutex<EngineStats>,
    latest: Mutex<Vec<Opportunity>>,
}

impl<M: MarketDataSource, E: Exchange> ArbitrageEngine<M, E> {
    /// Create a detection-only engine.
    pub fn new(
        market: M,
        scanner: OpportunityScanner,
        risk: RiskCalculator,
        settings: EngineSettings,
    ) -> Self {
        Self {
            market,
            scanner: Arc::new(scanner),
            risk,
            executor: None,
            settings,
            symbols: Mutex::new(None),
            stats: Mutex::new(EngineStats::default()),
            latest: Mutex::new(Vec::new()),
        }
    }

    /// Attach an execution coordinator.
    pub fn with_executor(mut self, executor: ExecutionCoordinator<E>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Whether accepted opportunities are executed.
    pub fn can_execute(&self) -> bool {
        self.executor.is_some()
    }

    /// Settings in use.
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Scanner in use.
    pub fn scanner(&self) -> &OpportunityScanner {
        &self.scanner
    }

    /// Risk evaluator in use.
    pub fn risk(&self) -> &RiskCalculator {
        &self.risk
    }

    /// Execution coordinator, when attached.
    pub fn executor(&self) -> Option<&ExecutionCoordinator<E>> {
        self.executor.as_ref()
    }

    /// Cumulative counters.
    pub fn stats(&self) -> EngineStats {
        lock(&self.stats).clone()
    }

    /// Scanner counters.
    pub fn scanner_stats(&self) -> ScannerStats {
        self.scanner.stats()
    }

    /// Execution counters, when an executor is attached.
    pub fn executor_stats(&self) -> Option<ExecutorStats> {
        self.executor.as_ref().map(ExecutionCoordinator::stats)
    }

    /// Budget overview at the configured capital.
    pub fn risk_summary(&self) -> RiskSummary {
        self.risk.risk_summary(self.settings.capital)
    }

    /// Opportunities from the last completed scan, ranked.
    pub fn latest_opportunities(&self) -> Vec<Opportunity> {
        lock(&self.latest).clone()
    }

    /// Symbol metadata, reloaded when older than the refresh interval.
    pub async fn load_symbols(&self) -> Result<Arc<SymbolSet>, BotError> {
        let cached = lock(&self.symbols)
            .as_ref()
            .filter(|c| c.loaded.elapsed() < self.settings.symbol_refresh)
            .map(|c| c.symbols.clone());
        if let Some(symbols) = cached {
            return Ok(symbols);
        }

        let symbols = Arc::new(self.market.exchange_symbols().await?);
        info!(symbols = symbols.len(), "Symbol metadata loaded");

        if let Some(executor) = &self.executor {
            executor.exchange().observe_symbols(&symbols);
        }
        *lock(&self.symbols) = Some(CachedSymbols {
            symbols: symbols.clone(),
            loaded: Instant::now(),
        });
        Ok(symbols)
    }

    /// Fetch market conditions and the books a scan needs.
    #[instrument(skip_all)]
    pub async fn fetch_market(&self, symbols: &SymbolSet) -> (MarketSnapshot, MarketConditions) {
        let base = self.settings.base_asset.as_str();

        let (universe, conditions) = match self.market.market_tickers().await {
            Ok(tickers) => {
                let mut quoted: Vec<_> = tickers
                    .iter()
                    .filter(|t| {
                        symbols
                            .get(&t.symbol)
                            .is_some_and(|s| s.quote == base && s.base != base)
                    })
                    .collect();
                quoted.sort_by(|a, b| {
                    b.quote_volume
                        .cmp(&a.quote_volume)
                        .then_with(|| a.symbol.cmp(&b.symbol))
                });
                let universe: Vec<String> = quoted
                    .into_iter()
                    .take(self.settings.top_n_pairs)
                    .map(|t| t.symbol.clone())
                    .collect();
                let conditions =
                    MarketConditions::from_tickers(&tickers, &self.settings.volatility_proxy);
                (universe, conditions)
            }
            Err(e) => {
                warn!(error = %e, "Ticker fetch failed, using neutral market conditions");
                (Vec::new(), MarketConditions::default())
            }
        };

        let universe = if universe.is_empty() {
            let mut names: Vec<String> = symbols
                .quoted_in(base)
                .filter(|s| s.base != base)
                .map(|s| s.name.clone())
                .collect();
            names.sort();
            names.truncate(self.settings.top_n_pairs);
            names
        } else {
            universe
        };

        let mut snapshot = fetch_snapshot(
            &self.market,
            &universe,
            self.settings.book_limit,
            self.settings.fetch_concurrency,
        )
        .await;

        let mut assets = self.scanner.select_candidate_assets(&snapshot, symbols);
        assets.push(self.settings.base_asset.clone());
        let missing: Vec<String> = symbols
            .connecting(&assets)
            .into_iter()
            .filter(|s| snapshot.book(s).is_none())
            .collect();
        if !missing.is_empty() {
            let extra = fetch_snapshot(
                &self.market,
                &missing,
                self.settings.book_limit,
                self.settings.fetch_concurrency,
            )
            .await;
            snapshot.merge(extra);
        }

        debug!(
            universe = universe.len(),
            connecting = missing.len(),
            books = snapshot.len(),
            "Market snapshot assembled"
        );
        (snapshot, conditions)
    }

    /// Run one fetch, scan, evaluate and execute cycle.
    ///
    /// `cancel` stops the scan between route evaluations and skips execution.
    #[instrument(skip_all)]
    pub async fn run_cycle(&self, cancel: &Arc<AtomicBool>) -> Result<CycleReport, BotError> {
        let started = Instant::now();
        let _timer = metrics::timer_scan_cycle();
        metrics::inc_scan_cycles();

        let result = self.cycle(cancel, started).await;
        let mut stats = lock(&self.stats);
        match &result {
            Ok(report) => {
                stats.cycles += 1;
                stats.opportunities_detected += report.evaluated.len() as u64;
                stats.opportunities_accepted += report.accepted() as u64;
                stats.opportunities_rejected += report.rejected() as u64;
                if report.execution.is_some() {
                    stats.executions += 1;
                }
                stats.last_cycle_ms = report.elapsed.as_secs_f64() * 1000.0;
            }
            Err(_) => {
                stats.failed_cycles += 1;
                metrics::inc_scan_cycle_errors();
            }
        }
        result
    }

    async fn cycle(&self, cancel: &Arc<AtomicBool>, started: Instant) -> Result<CycleReport, BotError> {
        let symbols = self.load_symbols().await?;
        let (snapshot, conditions) = self.fetch_market(&symbols).await;
        let snapshot = Arc::new(snapshot);

        if let Some(executor) = &self.executor {
            executor.exchange().observe_snapshot(&snapshot);
        }

        let assets = self.scanner.select_candidate_assets(&snapshot, &symbols);
        let scan = {
            let scanner = self.scanner.clone();
            let snapshot = snapshot.clone();
            let symbols = symbols.clone();
            let amounts = self.settings.trial_amounts.clone();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                scanner.scan_with_cancel(&assets, &amounts, &snapshot, &symbols, &cancel)
            })
            .await?
        };

        *lock(&self.latest) = scan.opportunities.clone();

        let capital = self.capital().await;
        let view = MarketView::new(&snapshot, &symbols, &conditions);
        let mut evaluated = Vec::with_capacity(scan.opportunities.len());
        for opportunity in scan.opportunities {
            evaluated.push(self.evaluate(opportunity, view, capital)?);
        }

        let mut execution = None;
        let cancelled = scan.cancelled || cancel.load(Ordering::SeqCst);
        if !cancelled {
            if let Some(executor) = &self.executor {
                if let Some(best) = evaluated.iter_mut().find(|e| e.accepted()) {
                    execution = self
                        .execute(executor, best, &snapshot, &symbols, capital)
                        .await?;
                }
            }
        }

        let report = CycleReport {
            routes_evaluated: scan.evaluated,
            books: snapshot.len(),
            cancelled,
            execution,
            elapsed: started.elapsed(),
            evaluated,
        };

        debug!(
            books = report.books,
            evaluated = report.routes_evaluated,
            found = report.evaluated.len(),
            accepted = report.accepted(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Cycle complete"
        );
        Ok(report)
    }

    fn evaluate(
        &self,
        opportunity: Opportunity,
        view: MarketView<'_>,
        capital: Decimal,
    ) -> Result<EvaluatedOpportunity, BotError> {
        let mut lifecycle = RouteLifecycle::new(opportunity.route.clone());
        lifecycle.advance(RouteState::LiquidityChecked)?;
        let (metrics, decision) = self.risk.evaluate(&opportunity, view, capital);
        lifecycle.advance(RouteState::RiskScored)?;

        if decision.is_accept() {
            lifecycle.advance(RouteState::Accepted)?;
            metrics::inc_opportunities_accepted();
        } else {
            lifecycle.advance(RouteState::Rejected)?;
            metrics::inc_opportunities_rejected();
        }

        Ok(EvaluatedOpportunity {
            opportunity,
            metrics,
            lifecycle,
        })
    }

    async fn execute(
        &self,
        executor: &ExecutionCoordinator<E>,
        candidate: &mut EvaluatedOpportunity,
        snapshot: &MarketSnapshot,
        symbols: &SymbolSet,
        capital: Decimal,
    ) -> Result<Option<ExecutionResult>, BotError> {
        let amount = candidate
            .opportunity
            .amount
            .min(candidate.metrics.recommended_size);
        if amount < executor.settings().min_trade_amount {
            debug!(
                route = %candidate.opportunity.route,
                recommended = %candidate.metrics.recommended_size,
                "Recommended size below minimum trade amount"
            );
            return Ok(None);
        }

        candidate.lifecycle.advance(RouteState::Executing)?;
        let result = executor
            .execute(&candidate.opportunity.route, amount, snapshot, symbols)
            .await;

        candidate
            .lifecycle
            .finish(result.success, &result.rollback)?;

        if !result.orders.is_empty() {
            self.risk.record_execution(amount, capital);
        }
        Ok(Some(result))
    }

    async fn capital(&self) -> Decimal {
        let Some(executor) = &self.executor else {
            return self.settings.capital;
        };
        match executor
            .exchange()
            .available_capital(&self.settings.base_asset)
            .await
        {
            Ok(capital) if capital > Decimal::ZERO => capital,
            Ok(_) => self.settings.capital,
            Err(e) => {
                warn!(error = %e, "Balance unavailable, using configured capital");
                self.settings.capital
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::{ExecutionSettings, RouteSimulator, ScannerSettings};
    use crate::market::{FeeSource, FeeTable, MockConfig, MockExchange, MockOrderBookBuilder, Symbol};
    use crate::risk::{LiquidityAnalyzer, LiquiditySettings, RiskSettings};
    use pretty_assertions::assert_eq;

    fn market(config: MockConfig) -> MockExchange {
        let mock = MockExchange::with_config(config);
        mock.add_symbol(Symbol::new("BTC", "USDT"));
        mock.add_symbol(Symbol::new("ETH", "BTC"));
        mock.add_symbol(Symbol::new("ETH", "USDT"));
        mock.set_order_book(
            MockOrderBookBuilder::new("BTCUSDT")
                .ladder(dec!(49990), dec!(50000), dec!(1), dec!(1000), 5)
                .build(),
        );
        mock.set_order_book(
            MockOrderBookBuilder::new("ETHBTC")
                .ladder(dec!(0.0499), dec!(0.05), dec!(0.0001), dec!(1000), 5)
                .build(),
        );
        mock.set_order_book(
            MockOrderBookBuilder::new("ETHUSDT")
                .ladder(dec!(2600), dec!(2601), dec!(1), dec!(1000), 5)
                .build(),
        );
        mock.set_balance("USDT", dec!(1000));
        mock
    }

    fn engine(mock: &MockExchange) -> ArbitrageEngine<MockExchange, MockExchange> {
        let fees: Arc<dyn FeeSource> = Arc::new(FeeTable::default());
        let analyzer = || LiquidityAnalyzer::new(LiquiditySettings::default(), fees.clone(), dec!(0.001));
        let scanner = OpportunityScanner::new(
            ScannerSettings::default(),
            RouteSimulator::new(fees.clone(), dec!(0.001)),
            analyzer(),
        );
        let risk = RiskCalculator::new(RiskSettings::default(), analyzer());
        ArbitrageEngine::new(mock.clone(), scanner, risk, EngineSettings::default())
    }

    fn no_cancel() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[tokio::test]
    async fn detection_only_cycle_evaluates_without_trading() {
        let mock = market(MockConfig::default());
        let engine = engine(&mock);
        assert!(!engine.can_execute());

        let report = engine.run_cycle(&no_cancel()).await.unwrap();

        assert_eq!(report.books, 3);
        assert!(!report.evaluated.is_empty());
        assert!(report
            .evaluated
            .iter()
            .all(|e| e.opportunity.route.to_string() == "USDT -> BTC -> ETH -> USDT"));
        assert!(report.execution.is_none());
        assert!(mock.orders().is_empty());

        let stats = engine.stats();
        assert_eq!(stats.cycles, 1);
        assert_eq!(stats.opportunities_detected, report.evaluated.len() as u64);
        assert_eq!(engine.latest_opportunities().len(), report.evaluated.len());
    }

    #[tokio::test]
    async fn cycle_executes_best_accepted_at_recommended_size() {
        let mock = market(MockConfig::default());
        let executor = ExecutionCoordinator::new(
            mock.clone(),
            Arc::new(FeeTable::default()),
            ExecutionSettings::default(),
        );
        let engine = engine(&mock).with_executor(executor);

        let report = engine.run_cycle(&no_cancel()).await.unwrap();
        assert!(report.accepted() > 0);

        let execution = report.execution.expect("accepted opportunity should execute");
        assert!(execution.success, "{:?}", execution.error);
        // Per-trade risk caps the size at 2% of the 1000 USDT balance.
        assert!(execution.initial_amount <= dec!(20));
        assert_eq!(mock.orders().len(), 3);

        let executed = report
            .evaluated
            .iter()
            .find(|e| e.lifecycle.state() == RouteState::Succeeded);
        assert!(executed.is_some());
        assert_eq!(engine.risk().daily_state().1, 1);
        assert_eq!(engine.executor_stats().unwrap().successful_executions, 1);
    }

    #[tokio::test]
    async fn failed_spot_execution_ends_rolled_back() {
        let mock = market(MockConfig::default());
        mock.fail_orders(
            "ETHBTC",
            10,
            crate::error::TradingError::OrderRejected {
                reason: "MARKET_CLOSED".to_string(),
            },
        );
        let executor = ExecutionCoordinator::new(
            mock.clone(),
            Arc::new(FeeTable::default()),
            ExecutionSettings::default(),
        );
        let engine = engine(&mock).with_executor(executor);

        let report = engine.run_cycle(&no_cancel()).await.unwrap();

        let execution = report.execution.expect("accepted opportunity should execute");
        assert!(!execution.success);
        let executed = report
            .evaluated
            .iter()
            .find(|e| e.lifecycle.history().contains(&RouteState::Executing))
            .expect("executed route is tracked");
        assert_eq!(executed.lifecycle.state(), RouteState::RolledBack);
        assert!(executed.lifecycle.is_finished());
    }

    #[tokio::test]
    async fn ticker_failure_falls_back_to_quoted_pairs() {
        let mock = market(MockConfig {
            fail_tickers: true,
            ..Default::default()
        });
        let engine = engine(&mock);

        let symbols = engine.load_symbols().await.unwrap();
        let (snapshot, conditions) = engine.fetch_market(&symbols).await;

        assert!(snapshot.book("BTCUSDT").is_some());
        assert!(snapshot.book("ETHUSDT").is_some());
        assert!(snapshot.book("ETHBTC").is_some());
        assert!(!conditions.high_volatility);
    }

    #[tokio::test]
    async fn symbol_failure_fails_the_cycle() {
        let mock = market(MockConfig {
            fail_symbols: true,
            ..Default::default()
        });
        let engine = engine(&mock);

        let result = engine.run_cycle(&no_cancel()).await;

        assert!(matches!(result, Err(BotError::Market(_))));
        assert_eq!(engine.stats().failed_cycles, 1);
    }

    #[tokio::test]
    async fn cancelled_cycle_skips_execution() {
        let mock = market(MockConfig::default());
        let executor = ExecutionCoordinator::new(
            mock.clone(),
            Arc::new(FeeTable::default()),
            ExecutionSettings::default(),
        );
        let engine = engine(&mock).with_executor(executor);

        let report = engine
            .run_cycle(&Arc::new(AtomicBool::new(true)))
            .await
            .unwrap();

        assert!(report.cancelled);
        assert!(report.execution.is_none());
        assert!(mock.orders().is_empty());
    }

    #[tokio::test]
    async fn symbols_are_cached_between_cycles() {
        let mock = market(MockConfig::default());
        let engine = engine(&mock);

        let first = engine.load_symbols().await.unwrap();
        mock.add_symbol(Symbol::new("SOL", "USDT"));
        let second = engine.load_symbols().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!second.contains("SOLUSDT"));
    }
}
