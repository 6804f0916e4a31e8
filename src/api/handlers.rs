//! HTTP API handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use metrics_exporter_prometheus::PrometheusHandle;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::arbitrage::{ExecutorStats, Opportunity, ScannerStats};
use crate::engine::EngineStats;
use crate::risk::RiskSummary;

/// Application state shared with handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Whether symbol metadata is loaded and cycles are running.
    pub ready: Arc<AtomicBool>,
    /// Latest engine status.
    pub status: Arc<RwLock<BotStatus>>,
    /// Opportunities from the last scan.
    pub opportunities: Arc<RwLock<Vec<OpportunityView>>>,
    /// Prometheus recorder handle, when installed.
    pub prometheus: Option<PrometheusHandle>,
}

/// Engine status published after each cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BotStatus {
    /// `paper`, `live` or `detection-only`.
    pub mode: String,
    /// Base asset.
    pub base_asset: String,
    /// Cycle counters.
    pub engine: EngineStats,
    /// Scanner counters.
    pub scanner: ScannerStats,
    /// Execution counters, when trading.
    pub executor: Option<ExecutorStats>,
    /// Daily risk budget.
    pub risk: Option<RiskSummary>,
}

/// Serializable summary of an opportunity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpportunityView {
    pub route: String,
    pub hops: usize,
    pub symbols: Vec<String>,
    pub amount: Decimal,
    pub final_amount: Decimal,
    pub expected_profit: Decimal,
    pub profit_pct: Decimal,
    pub confidence: Decimal,
    pub slippage: Decimal,
    pub risk_score: Decimal,
    pub priority: Decimal,
    /// Unix timestamp in seconds.
    pub detected_at: i64,
}

impl From<&Opportunity> for OpportunityView {
    fn from(o: &Opportunity) -> Self {
        Self {
            route: o.route.to_string(),
            hops: o.hops(),
            symbols: o.symbols(),
            amount: o.amount,
            final_amount: o.final_amount,
            expected_profit: o.expected_profit,
            profit_pct: o.profit_pct,
            confidence: o.confidence,
            slippage: o.slippage,
            risk_score: o.risk_score,
            priority: o.priority,
            detected_at: o.detected_at.unix_timestamp(),
        }
    }
}

impl AppState {
    /// Create new app state.
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            status: Arc::new(RwLock::new(BotStatus::default())),
            opportunities: Arc::new(RwLock::new(Vec::new())),
            prometheus: None,
        }
    }

    /// Attach the Prometheus handle rendered at `/metrics`.
    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    /// Set ready state.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Check if ready.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Replace the published status.
    pub async fn publish_status(&self, status: BotStatus) {
        *self.status.write().await = status;
    }

    /// Replace the published opportunities.
    pub async fn publish_opportunities(&self, opportunities: &[Opportunity]) {
        *self.opportunities.write().await =
            opportunities.iter().map(OpportunityView::from).collect();
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status: "ok".
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether service is ready.
    pub ready: bool,
    /// Current mode.
    pub mode: String,
}

/// Status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Service status.
    pub status: &'static str,
    /// Engine status.
    #[serde(flatten)]
    pub bot: BotStatus,
}

/// Opportunities response.
#[derive(Debug, Serialize)]
pub struct OpportunitiesResponse {
    /// Number of opportunities.
    pub count: usize,
    /// Ranked opportunities.
    pub opportunities: Vec<OpportunityView>,
}

/// Health check handler - always returns 200.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness check handler - returns 200 if ready, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let is_ready = state.is_ready();
    let mode = state.status.read().await.mode.clone();

    let response = ReadyResponse {
        ready: is_ready,
        mode,
    };

    if is_ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Status handler - returns engine status and statistics.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let bot = state.status.read().await.clone();
    let status = if state.is_ready() { "running" } else { "starting" };

    Json(StatusResponse { status, bot })
}

/// Opportunities handler - returns the last scan's ranked opportunities.
pub async fn opportunities(State(state): State<AppState>) -> impl IntoResponse {
    let opportunities = state.opportunities.read().await.clone();

    Json(OpportunitiesResponse {
        count: opportunities.len(),
        opportunities,
    })
}

/// Metrics handler - renders Prometheus text, 404 without a recorder.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::NOT_FOUND,
            "metrics recorder not installed".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_state_ready_toggle() {
        let state = AppState::new();
        assert!(!state.is_ready());

        state.set_ready(true);
        assert!(state.is_ready());

        state.set_ready(false);
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn publish_status_replaces_previous() {
        let state = AppState::new();
        state
            .publish_status(BotStatus {
                mode: "paper".to_string(),
                base_asset: "USDT".to_string(),
                ..Default::default()
            })
            .await;

        assert_eq!(state.status.read().await.mode, "paper");
    }
}
