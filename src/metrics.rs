//! Prometheus metrics for scan cycles, executions and latency.
//!
//! Covers:
//! - Scan cycle and order book fetch latency
//! - Route evaluation and opportunity counters
//! - Order submission, execution and rollback counters

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::debug;

// === Metric Name Constants ===

/// Scan cycle latency metric name.
pub const METRIC_SCAN_CYCLE_LATENCY: &str = "scan_cycle_latency_ms";
/// Order book fetch latency metric name.
pub const METRIC_ORDERBOOK_FETCH_LATENCY: &str = "orderbook_fetch_latency_ms";
/// Order submission latency metric name.
pub const METRIC_ORDER_SUBMIT_LATENCY: &str = "order_submit_latency_ms";
/// Scan cycles counter metric name.
pub const METRIC_SCAN_CYCLES: &str = "scan_cycles_total";
/// Failed scan cycles counter metric name.
pub const METRIC_SCAN_CYCLE_ERRORS: &str = "scan_cycle_errors_total";
/// Order book fetch failures counter metric name.
pub const METRIC_ORDERBOOK_FETCH_ERRORS: &str = "orderbook_fetch_errors_total";
/// Route evaluations counter metric name.
pub const METRIC_ROUTES_EVALUATED: &str = "routes_evaluated_total";
/// Opportunities detected counter metric name.
pub const METRIC_OPPORTUNITIES_DETECTED: &str = "opportunities_detected_total";
/// Opportunities accepted by the risk evaluator.
pub const METRIC_OPPORTUNITIES_ACCEPTED: &str = "opportunities_accepted_total";
/// Opportunities rejected by the risk evaluator.
pub const METRIC_OPPORTUNITIES_REJECTED: &str = "opportunities_rejected_total";
/// Orders submitted counter metric name.
pub const METRIC_ORDERS_SUBMITTED: &str = "orders_submitted_total";
/// Orders failed counter metric name.
pub const METRIC_ORDERS_FAILED: &str = "orders_failed_total";
/// Route executions counter metric name, labelled by outcome.
pub const METRIC_EXECUTIONS: &str = "executions_total";
/// Margin rollbacks counter metric name.
pub const METRIC_ROLLBACKS: &str = "rollbacks_total";
/// Failed rollbacks counter metric name.
pub const METRIC_ROLLBACK_FAILURES: &str = "rollback_failures_total";

/// Initialize all metric descriptions.
/// Call this once at startup, after the recorder is installed.
pub fn init_metrics() {
    describe_histogram!(
        METRIC_SCAN_CYCLE_LATENCY,
        "Scan cycle latency (fetch, scan, evaluate) in milliseconds"
    );
    describe_histogram!(
        METRIC_ORDERBOOK_FETCH_LATENCY,
        "Order book fetch latency in milliseconds"
    );
    describe_histogram!(
        METRIC_ORDER_SUBMIT_LATENCY,
        "Order submission latency in milliseconds"
    );

    describe_counter!(METRIC_SCAN_CYCLES, "Total number of scan cycles");
    describe_counter!(METRIC_SCAN_CYCLE_ERRORS, "Total number of failed scan cycles");
    describe_counter!(
        METRIC_ORDERBOOK_FETCH_ERRORS,
        "Total number of order book fetches that failed"
    );
    describe_counter!(
        METRIC_ROUTES_EVALUATED,
        "Total number of route and amount pairs evaluated"
    );
    describe_counter!(
        METRIC_OPPORTUNITIES_DETECTED,
        "Total number of arbitrage opportunities detected"
    );
    describe_counter!(
        METRIC_OPPORTUNITIES_ACCEPTED,
        "Total number of opportunities accepted by risk evaluation"
    );
    describe_counter!(
        METRIC_OPPORTUNITIES_REJECTED,
        "Total number of opportunities rejected by risk evaluation"
    );
    describe_counter!(METRIC_ORDERS_SUBMITTED, "Total number of orders submitted");
    describe_counter!(METRIC_ORDERS_FAILED, "Total number of orders that failed");
    describe_counter!(METRIC_EXECUTIONS, "Total number of route executions");
    describe_counter!(METRIC_ROLLBACKS, "Total number of margin loan rollbacks");
    describe_counter!(
        METRIC_ROLLBACK_FAILURES,
        "Total number of rollbacks that could not repay the loan"
    );

    debug!("Metrics initialized");
}

/// Install the Prometheus recorder and describe all metrics.
pub fn install_prometheus() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    init_metrics();
    Ok(handle)
}

/// Increment scan cycles counter.
pub fn inc_scan_cycles() {
    counter!(METRIC_SCAN_CYCLES).increment(1);
}

/// Increment failed scan cycles counter.
pub fn inc_scan_cycle_errors() {
    counter!(METRIC_SCAN_CYCLE_ERRORS).increment(1);
}

/// Increment order book fetch failures counter.
pub fn inc_orderbook_fetch_errors(symbol: &str) {
    counter!(METRIC_ORDERBOOK_FETCH_ERRORS, "symbol" => symbol.to_string()).increment(1);
}

/// Add to the routes evaluated counter.
pub fn add_routes_evaluated(n: u64) {
    counter!(METRIC_ROUTES_EVALUATED).increment(n);
}

/// Add to the opportunities detected counter.
pub fn add_opportunities_detected(n: u64) {
    counter!(METRIC_OPPORTUNITIES_DETECTED).increment(n);
}

/// Increment opportunities accepted counter.
pub fn inc_opportunities_accepted() {
    counter!(METRIC_OPPORTUNITIES_ACCEPTED).increment(1);
}

/// Increment opportunities rejected counter.
pub fn inc_opportunities_rejected() {
    counter!(METRIC_OPPORTUNITIES_REJECTED).increment(1);
}

/// Increment orders submitted counter.
pub fn inc_orders_submitted() {
    counter!(METRIC_ORDERS_SUBMITTED).increment(1);
}

/// Increment orders failed counter.
pub fn inc_orders_failed() {
    counter!(METRIC_ORDERS_FAILED).increment(1);
}

/// Increment executions counter.
pub fn inc_executions(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!(METRIC_EXECUTIONS, "outcome" => outcome).increment(1);
}

/// Increment rollbacks counter.
pub fn inc_rollbacks() {
    counter!(METRIC_ROLLBACKS).increment(1);
}

/// Increment failed rollbacks counter.
pub fn inc_rollback_failures() {
    counter!(METRIC_ROLLBACK_FAILURES).increment(1);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(self.metric_name).record(self.elapsed_ms());
    }
}

/// Create a latency timer for a full scan cycle.
pub fn timer_scan_cycle() -> LatencyTimer {
    LatencyTimer::new(METRIC_SCAN_CYCLE_LATENCY)
}

/// Create a latency timer for an order book fetch.
pub fn timer_orderbook_fetch() -> LatencyTimer {
    LatencyTimer::new(METRIC_ORDERBOOK_FETCH_LATENCY)
}

/// Create a latency timer for order submission.
pub fn timer_order_submit() -> LatencyTimer {
    LatencyTimer::new(METRIC_ORDER_SUBMIT_LATENCY)
}
