//! Route execution as a sequence of market orders.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use strum::Display;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use super::route::Route;
use super::simulator::resolve_route;
use crate::error::{ExecutionError, TradingError};
use crate::market::{FeeSource, ResolvedLeg, SymbolSet};
use crate::metrics;
use crate::orderbook::{estimate_fill, MarketSnapshot};
use crate::trading::{Exchange, OrderFill, OrderRequest, OrderResult, Side};

/// Hard ceiling on concurrent executions.
pub const MAX_CONCURRENT_EXECUTIONS: usize = 3;

/// Execution limits and retry policy.
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    /// Smallest start amount accepted.
    pub min_trade_amount: Decimal,
    /// Realised slippage above this fails the hop.
    pub max_slippage: Decimal,
    /// Deadline for each order attempt.
    pub order_timeout: Duration,
    /// Total submission attempts per order.
    pub max_retries: u32,
    /// Pause between attempts.
    pub retry_backoff: Duration,
    /// Concurrent executions allowed, capped at [`MAX_CONCURRENT_EXECUTIONS`].
    pub max_concurrent: usize,
    /// Allow margin execution of triangles.
    pub margin_enabled: bool,
    /// Smallest amount executed on margin.
    pub margin_min_amount: Decimal,
    /// Remainder penalty used for expected prices.
    pub slippage_pct: Decimal,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            min_trade_amount: dec!(10),
            max_slippage: dec!(0.02),
            order_timeout: Duration::from_secs(8),
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
            max_concurrent: 1,
            margin_enabled: false,
            margin_min_amount: dec!(50),
            slippage_pct: dec!(0.001),
        }
    }
}

/// How a route is funded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionStrategy {
    /// Spend the base asset balance.
    Spot,
    /// Borrow the first intermediate asset and repay it afterwards.
    Margin,
}

/// What happened to a margin loan after a failed execution.
#[derive(Debug, Clone, PartialEq)]
pub enum RollbackOutcome {
    /// Nothing to undo.
    NotNeeded,
    /// Borrowed principal repaid.
    Repaid {
        /// Borrowed asset.
        asset: String,
        /// Principal repaid.
        amount: Decimal,
    },
    /// Repayment failed; the loan is still open.
    Failed {
        /// Borrowed asset.
        asset: String,
        /// Outstanding principal.
        amount: Decimal,
        /// Exchange error.
        reason: String,
    },
}

/// Outcome of one route execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Whether every hop completed and any loan was repaid.
    pub success: bool,
    /// Route executed.
    pub route: Route,
    /// Funding strategy.
    pub strategy: ExecutionStrategy,
    /// Amount of the base asset committed.
    pub initial_amount: Decimal,
    /// Amount of the base asset received. Zero on failure.
    pub final_amount: Decimal,
    /// `final_amount - initial_amount`.
    pub net_profit: Decimal,
    /// Fees valued in the base asset at the realised conversion rates.
    pub total_fees: Decimal,
    /// Wall time spent.
    pub elapsed: Duration,
    /// Per-hop records, up to the failing hop.
    pub orders: Vec<OrderResult>,
    /// Failure, if any.
    pub error: Option<ExecutionError>,
    /// Loan rollback outcome.
    pub rollback: RollbackOutcome,
}

/// Cumulative execution statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutorStats {
    /// Executions attempted.
    pub total_executions: u64,
    /// Executions that completed.
    pub successful_executions: u64,
    /// Executions that failed, validation included.
    pub failed_executions: u64,
    /// Successful over total.
    pub success_rate: f64,
    /// Profit summed over successful executions.
    pub total_profit: Decimal,
    /// Mean profit per successful execution.
    pub avg_profit: Decimal,
    /// Mean wall time per execution in seconds.
    pub avg_execution_secs: f64,
    /// Margin loans repaid after a failure.
    pub rollbacks: u64,
}

#[derive(Debug, Default)]
struct StatsState {
    total: u64,
    successful: u64,
    failed: u64,
    total_profit: Decimal,
    total_elapsed: Duration,
    rollbacks: u64,
}

/// Hops walked by one execution attempt.
struct HopsOutcome {
    orders: Vec<OrderResult>,
    final_amount: Decimal,
    total_fees: Decimal,
    failure: Option<ExecutionError>,
}

/// Runs routes against an [`Exchange`].
///
/// Executions funded from the same asset are serialized, and a semaphore
/// bounds how many run at once. An execution is never abandoned mid-hop.
pub struct ExecutionCoordinator<E> {
    exchange: E,
    fees: Arc<dyn FeeSource>,
    settings: ExecutionSettings,
    permits: Semaphore,
    asset_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    stats: Mutex<StatsState>,
}

impl<E: Exchange> ExecutionCoordinator<E> {
    /// Create a coordinator routing orders to `exchange`.
    pub fn new(exchange: E, fees: Arc<dyn FeeSource>, settings: ExecutionSettings) -> Self {
        let permits = settings.max_concurrent.clamp(1, MAX_CONCURRENT_EXECUTIONS);
        Self {
            exchange,
            fees,
            settings,
            permits: Semaphore::new(permits),
            asset_locks: DashMap::new(),
            stats: Mutex::new(StatsState::default()),
        }
    }

    /// Exchange in use.
    pub fn exchange(&self) -> &E {
        &self.exchange
    }

    /// Settings in use.
    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    /// Strategy `execute` would pick for `route` at `amount`.
    pub fn strategy_for(&self, route: &Route, amount: Decimal) -> ExecutionStrategy {
        if self.settings.margin_enabled
            && route.hops() == 3
            && amount >= self.settings.margin_min_amount
        {
            ExecutionStrategy::Margin
        } else {
            ExecutionStrategy::Spot
        }
    }

    /// Execute `route` starting with `amount` of its base asset.
    ///
    /// Never panics and never returns early mid-route: every failure is
    /// reported in the result, after any margin loan has been repaid.
    #[instrument(skip_all, fields(route = %route, amount = %amount))]
    pub async fn execute(
        &self,
        route: &Route,
        amount: Decimal,
        snapshot: &MarketSnapshot,
        symbols: &SymbolSet,
    ) -> ExecutionResult {
        let started = Instant::now();
        let strategy = self.strategy_for(route, amount);

        let legs = match self.validate(route, amount, strategy, symbols).await {
            Ok(legs) => legs,
            Err(reason) => {
                warn!(reason = %reason, "Execution rejected");
                let result = ExecutionResult::failed(
                    route,
                    strategy,
                    amount,
                    started.elapsed(),
                    Vec::new(),
                    ExecutionError::ValidationFailed {
                        route: route.to_string(),
                        reason,
                    },
                    RollbackOutcome::NotNeeded,
                );
                self.record(&result);
                return result;
            }
        };

        let Ok(_permit) = self.permits.acquire().await else {
            let result = ExecutionResult::failed(
                route,
                strategy,
                amount,
                started.elapsed(),
                Vec::new(),
                ExecutionError::ValidationFailed {
                    route: route.to_string(),
                    reason: "executor is shut down".to_string(),
                },
                RollbackOutcome::NotNeeded,
            );
            self.record(&result);
            return result;
        };

        let lock_asset = match strategy {
            ExecutionStrategy::Spot => route.base(),
            ExecutionStrategy::Margin => route.assets()[1].as_str(),
        };
        let lock = self.lock_for(lock_asset);
        let _guard = lock.lock().await;

        info!(strategy = %strategy, hops = route.hops(), "Executing route");

        let result = match strategy {
            ExecutionStrategy::Spot => {
                self.execute_spot(route, &legs, amount, snapshot, started)
                    .await
            }
            ExecutionStrategy::Margin => {
                self.execute_margin(route, &legs, amount, snapshot, started)
                    .await
            }
        };

        self.record(&result);
        self.log_execution(&result);
        result
    }

    async fn validate<'a>(
        &self,
        route: &Route,
        amount: Decimal,
        strategy: ExecutionStrategy,
        symbols: &'a SymbolSet,
    ) -> Result<Vec<ResolvedLeg<'a>>, String> {
        if amount < self.settings.min_trade_amount {
            return Err(format!(
                "amount {amount} below minimum {}",
                self.settings.min_trade_amount
            ));
        }

        let legs = resolve_route(route, symbols).map_err(|e| e.to_string())?;

        if strategy == ExecutionStrategy::Spot {
            let available = self
                .exchange
                .available_capital(route.base())
                .await
                .map_err(|e| format!("balance check failed: {e}"))?;
            if available < amount {
                return Err(format!(
                    "insufficient {} balance: need {amount}, have {available}",
                    route.base()
                ));
            }
        }

        Ok(legs.into_vec())
    }

    async fn execute_spot(
        &self,
        route: &Route,
        legs: &[ResolvedLeg<'_>],
        amount: Decimal,
        snapshot: &MarketSnapshot,
        started: Instant,
    ) -> ExecutionResult {
        let outcome = self.run_hops(route, legs, 0, amount, amount, snapshot).await;
        ExecutionResult::from_hops(
            route,
            ExecutionStrategy::Spot,
            amount,
            started.elapsed(),
            outcome,
            RollbackOutcome::NotNeeded,
        )
    }

    async fn execute_margin(
        &self,
        route: &Route,
        legs: &[ResolvedLeg<'_>],
        amount: Decimal,
        snapshot: &MarketSnapshot,
        started: Instant,
    ) -> ExecutionResult {
        let asset = route.assets()[1].clone();

        let principal = match self.borrow_amount(&legs[0], amount, snapshot) {
            Ok(principal) => principal,
            Err(reason) => {
                return ExecutionResult::failed(
                    route,
                    ExecutionStrategy::Margin,
                    amount,
                    started.elapsed(),
                    Vec::new(),
                    ExecutionError::BorrowFailed {
                        asset,
                        amount: Decimal::ZERO,
                        reason,
                    },
                    RollbackOutcome::NotNeeded,
                );
            }
        };

        info!(asset = %asset, principal = %principal, "Borrowing margin principal");
        if let Err(e) = self.exchange.borrow(&asset, principal).await {
            return ExecutionResult::failed(
                route,
                ExecutionStrategy::Margin,
                amount,
                started.elapsed(),
                Vec::new(),
                ExecutionError::BorrowFailed {
                    asset,
                    amount: principal,
                    reason: e.to_string(),
                },
                RollbackOutcome::NotNeeded,
            );
        }

        let outcome = self
            .run_hops(route, legs, 1, principal, amount, snapshot)
            .await;
        let failed = outcome.failure.is_some();
        if failed {
            metrics::inc_rollbacks();
            warn!(asset = %asset, principal = %principal, "Rolling back margin loan");
        }

        let repay = self.exchange.repay(&asset, principal).await;
        let rollback = match (&repay, failed) {
            (Ok(()), false) => RollbackOutcome::NotNeeded,
            (Ok(()), true) => {
                self.lock_stats().rollbacks += 1;
                RollbackOutcome::Repaid {
                    asset: asset.clone(),
                    amount: principal,
                }
            }
            (Err(e), _) => {
                metrics::inc_rollback_failures();
                error!(
                    asset = %asset,
                    principal = %principal,
                    error = %e,
                    "Margin loan repayment FAILED; loan remains open"
                );
                RollbackOutcome::Failed {
                    asset: asset.clone(),
                    amount: principal,
                    reason: e.to_string(),
                }
            }
        };

        let mut result = ExecutionResult::from_hops(
            route,
            ExecutionStrategy::Margin,
            amount,
            started.elapsed(),
            outcome,
            rollback,
        );
        if let Err(e) = repay {
            result.success = false;
            result.final_amount = Decimal::ZERO;
            result.net_profit = -amount;
            result.error = Some(ExecutionError::RollbackFailed {
                asset,
                amount: principal,
                reason: e.to_string(),
            });
        }
        result
    }

    /// Units of the first intermediate asset worth `amount` at the touch.
    fn borrow_amount(
        &self,
        leg: &ResolvedLeg<'_>,
        amount: Decimal,
        snapshot: &MarketSnapshot,
    ) -> Result<Decimal, String> {
        let book = snapshot
            .book(&leg.symbol.name)
            .ok_or_else(|| format!("no book for {}", leg.symbol.name))?;
        let fill = estimate_fill(
            book.levels_for(leg.side),
            leg.side,
            amount,
            self.settings.slippage_pct,
        )
        .map_err(|e| e.to_string())?;

        let raw = fill.convert(leg.side, amount);
        let principal = match leg.side {
            Side::Buy => leg.symbol.format_quantity(raw),
            Side::Sell => raw,
        };
        if principal <= Decimal::ZERO {
            return Err(format!("borrow amount {raw} rounds to zero"));
        }
        Ok(principal)
    }

    /// Walk `legs[start_hop..]` spending `amount_in` at the first of them.
    async fn run_hops(
        &self,
        route: &Route,
        legs: &[ResolvedLeg<'_>],
        start_hop: usize,
        amount_in: Decimal,
        initial_amount: Decimal,
        snapshot: &MarketSnapshot,
    ) -> HopsOutcome {
        let mut orders = Vec::with_capacity(legs.len());
        let mut amount = amount_in;

        for (hop, leg) in legs.iter().enumerate().skip(start_hop) {
            let order = self.execute_hop(hop, leg, amount, snapshot).await;
            let failed = !order.success;
            let next = order.amount_out;
            let reason = order.error.clone();
            orders.push(order);

            if failed {
                return HopsOutcome {
                    orders,
                    final_amount: Decimal::ZERO,
                    total_fees: Decimal::ZERO,
                    failure: Some(ExecutionError::ExecutionFailed {
                        route: route.to_string(),
                        amount: initial_amount,
                        hop,
                        symbol: leg.symbol.name.clone(),
                        reason: reason.unwrap_or_else(|| "unknown".to_string()),
                    }),
                };
            }
            amount = next;
        }

        // One unit of a hop's output is worth final / amount_out in the base asset.
        let total_fees: Decimal = orders
            .iter()
            .filter(|o| !o.amount_out.is_zero())
            .map(|o| o.fee * amount / o.amount_out)
            .sum();

        HopsOutcome {
            orders,
            final_amount: amount,
            total_fees,
            failure: None,
        }
    }

    #[instrument(skip_all, fields(hop = hop, symbol = %leg.symbol.name, side = %leg.side))]
    async fn execute_hop(
        &self,
        hop: usize,
        leg: &ResolvedLeg<'_>,
        amount_in: Decimal,
        snapshot: &MarketSnapshot,
    ) -> OrderResult {
        let symbol = leg.symbol.name.as_str();
        let request = match leg.side {
            Side::Buy => OrderRequest::buy(symbol, amount_in),
            Side::Sell => OrderRequest::sell(symbol, leg.symbol.format_quantity(amount_in)),
        };

        let expected_price = snapshot
            .book(symbol)
            .and_then(|book| {
                estimate_fill(
                    book.levels_for(leg.side),
                    leg.side,
                    request.quantity.amount(),
                    self.settings.slippage_pct,
                )
                .ok()
            })
            .map(|fill| fill.price);

        let mut record = OrderResult {
            hop,
            symbol: symbol.to_string(),
            side: leg.side,
            requested: request.quantity,
            success: false,
            order_id: None,
            executed_qty: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            expected_price: expected_price.unwrap_or(Decimal::ZERO),
            slippage: Decimal::ZERO,
            amount_out: Decimal::ZERO,
            fee: Decimal::ZERO,
            attempts: 0,
            error: None,
        };

        let fill = match self.submit_with_retry(&request, &mut record.attempts).await {
            Ok(fill) => fill,
            Err(e) => {
                metrics::inc_orders_failed();
                record.error = Some(e.to_string());
                return record;
            }
        };

        record.order_id = Some(fill.order_id.clone());
        record.executed_qty = fill.executed_qty;
        record.avg_price = fill.avg_price;

        if !fill.status.is_filled() {
            metrics::inc_orders_failed();
            record.error = Some(format!("order {} ended {}", fill.order_id, fill.status));
            return record;
        }

        let expected = expected_price.unwrap_or(fill.avg_price);
        if !expected.is_zero() {
            record.slippage = ((fill.avg_price - expected) / expected).abs();
        }

        let received = fill.received(leg.side);
        record.fee = received * self.fees.taker_fee(symbol);
        record.amount_out = received - record.fee;

        if record.slippage > self.settings.max_slippage {
            record.error = Some(format!(
                "slippage {} exceeds maximum {}",
                record.slippage, self.settings.max_slippage
            ));
            return record;
        }
        if record.amount_out <= Decimal::ZERO {
            record.error = Some("order produced nothing".to_string());
            return record;
        }

        debug!(
            order_id = %fill.order_id,
            executed_qty = %fill.executed_qty,
            avg_price = %fill.avg_price,
            amount_out = %record.amount_out,
            "Hop filled"
        );
        record.success = true;
        record
    }

    async fn submit_with_retry(
        &self,
        request: &OrderRequest,
        attempts: &mut u32,
    ) -> Result<OrderFill, TradingError> {
        let max_attempts = self.settings.max_retries.max(1);
        loop {
            *attempts += 1;
            metrics::inc_orders_submitted();
            let _timer = metrics::timer_order_submit();

            let outcome =
                tokio::time::timeout(self.settings.order_timeout, self.exchange.place_market_order(request))
                    .await;
            match outcome {
                Ok(Ok(fill)) => return Ok(fill),
                Ok(Err(TradingError::RateLimited { retry_after_seconds }))
                    if Duration::from_secs(retry_after_seconds) > self.settings.order_timeout =>
                {
                    warn!(
                        symbol = %request.symbol,
                        retry_after_seconds,
                        "Rate limit outlasts the order timeout, abandoning hop"
                    );
                    return Err(TradingError::RateLimited { retry_after_seconds });
                }
                Ok(Err(e)) if e.is_retryable() && *attempts < max_attempts => {
                    warn!(
                        symbol = %request.symbol,
                        attempt = *attempts,
                        error = %e,
                        "Order failed, retrying"
                    );
                    if let TradingError::RateLimited {
                        retry_after_seconds,
                    } = e
                    {
                        tokio::time::sleep(Duration::from_secs(retry_after_seconds)).await;
                    } else {
                        tokio::time::sleep(self.settings.retry_backoff).await;
                    }
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(TradingError::Timeout {
                        symbol: request.symbol.clone(),
                        timeout_ms: self.settings.order_timeout.as_millis() as u64,
                    })
                }
            }
        }
    }

    fn lock_for(&self, asset: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.asset_locks
            .entry(asset.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, StatsState> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, result: &ExecutionResult) {
        metrics::inc_executions(result.success);
        let mut stats = self.lock_stats();
        stats.total += 1;
        stats.total_elapsed += result.elapsed;
        if result.success {
            stats.successful += 1;
            stats.total_profit += result.net_profit;
        } else {
            stats.failed += 1;
        }
    }

    /// Snapshot of cumulative statistics.
    pub fn stats(&self) -> ExecutorStats {
        let stats = self.lock_stats();
        let success_rate = if stats.total == 0 {
            0.0
        } else {
            stats.successful as f64 / stats.total as f64
        };
        let avg_profit = if stats.successful == 0 {
            Decimal::ZERO
        } else {
            stats.total_profit / Decimal::from(stats.successful)
        };
        let avg_execution_secs = if stats.total == 0 {
            0.0
        } else {
            stats.total_elapsed.as_secs_f64() / stats.total as f64
        };

        ExecutorStats {
            total_executions: stats.total,
            successful_executions: stats.successful,
            failed_executions: stats.failed,
            success_rate,
            total_profit: stats.total_profit,
            avg_profit,
            avg_execution_secs,
            rollbacks: stats.rollbacks,
        }
    }

    /// Zero all statistics.
    pub fn reset_stats(&self) {
        *self.lock_stats() = StatsState::default();
    }

    fn log_execution(&self, result: &ExecutionResult) {
        info!("========================================");
        if result.success {
            info!("ROUTE EXECUTED SUCCESSFULLY");
        } else {
            info!("ROUTE EXECUTION FAILED");
        }
        info!("========================================");
        info!("Route:                {}", result.route);
        info!("Strategy:             {}", result.strategy);
        info!("Initial amount:       {}", result.initial_amount);
        info!("Final amount:         {}", result.final_amount);
        info!("Fees:                 {}", result.total_fees.round_dp(8));
        info!("NET PROFIT:           {}", result.net_profit.round_dp(8));
        info!("Elapsed:              {:?}", result.elapsed);
        if let Some(e) = &result.error {
            info!("Error:                {}", e);
        }
        info!("========================================");
    }
}

impl ExecutionResult {
    fn failed(
        route: &Route,
        strategy: ExecutionStrategy,
        amount: Decimal,
        elapsed: Duration,
        orders: Vec<OrderResult>,
        error: ExecutionError,
        rollback: RollbackOutcome,
    ) -> Self {
        Self {
            success: false,
            route: route.clone(),
            strategy,
            initial_amount: amount,
            final_amount: Decimal::ZERO,
            net_profit: -amount,
            total_fees: Decimal::ZERO,
            elapsed,
            orders,
            error: Some(error),
            rollback,
        }
    }

    fn from_hops(
        route: &Route,
        strategy: ExecutionStrategy,
        amount: Decimal,
        elapsed: Duration,
        outcome: HopsOutcome,
        rollback: RollbackOutcome,
    ) -> Self {
        match outcome.failure {
            Some(error) => {
                Self::failed(route, strategy, amount, elapsed, outcome.orders, error, rollback)
            }
            None => Self {
                success: true,
                route: route.clone(),
                strategy,
                initial_amount: amount,
                final_amount: outcome.final_amount,
                net_profit: outcome.final_amount - amount,
                total_fees: outcome.total_fees,
                elapsed,
                orders: outcome.orders,
                error: None,
                rollback,
            },
        }
    }
}
