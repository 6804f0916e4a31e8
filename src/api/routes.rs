//! HTTP API route definitions.

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{health, metrics, opportunities, ready, status, AppState};

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Engine endpoints
        .route("/api/v1/status", get(status))
        .route("/api/v1/opportunities", get(opportunities))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::api::handlers::BotStatus;
    use crate::arbitrage::{Opportunity, Route, RouteSimulator};
    use crate::market::{FeeTable, SymbolSet};
    use crate::orderbook::MarketSnapshot;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use rust_decimal_macros::dec;
    use time::OffsetDateTime;
    use tower::ServiceExt;

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = create_router(AppState::new());
        let (status, body) = get_json(app, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn ready_endpoint_returns_503_when_not_ready() {
        let app = create_router(AppState::new());
        let (status, _) = get_json(app, "/ready").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn ready_endpoint_returns_200_when_ready() {
        let state = AppState::new();
        state.set_ready(true);
        let (status, body) = get_json(create_router(state), "/ready").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], true);
    }

    #[tokio::test]
    async fn status_endpoint_reports_mode_and_stats() {
        let state = AppState::new();
        state
            .publish_status(BotStatus {
                mode: "detection-only".to_string(),
                base_asset: "USDT".to_string(),
                ..Default::default()
            })
            .await;

        let (status, body) = get_json(create_router(state), "/api/v1/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "starting");
        assert_eq!(body["mode"], "detection-only");
        assert_eq!(body["engine"]["cycles"], 0);
        assert!(body["executor"].is_null());
    }

    #[tokio::test]
    async fn opportunities_endpoint_lists_last_scan() {
        let state = AppState::new();
        let route = Route::cycle("USDT", &["BTC", "ETH"]).unwrap();
        let simulation = RouteSimulator::new(Arc::new(FeeTable::default()), dec!(0.001)).simulate(
            &route,
            dec!(100),
            &MarketSnapshot::default(),
            &SymbolSet::default(),
        );
        let opportunity = Opportunity {
            route,
            amount: dec!(100),
            final_amount: dec!(103.688312),
            expected_profit: dec!(3.688312),
            profit_pct: dec!(3.688312),
            net_gain: dec!(0.03688312),
            confidence: dec!(1),
            execution_secs: dec!(1.5),
            slippage: dec!(0),
            risk_score: dec!(0.2),
            priority: dec!(0.5),
            simulation,
            detected_at: OffsetDateTime::UNIX_EPOCH,
        };
        state.publish_opportunities(&[opportunity]).await;

        let (status, body) = get_json(create_router(state), "/api/v1/opportunities").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["opportunities"][0]["route"], "USDT -> BTC -> ETH -> USDT");
        assert_eq!(body["opportunities"][0]["detected_at"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_needs_recorder() {
        let (status, _) = get_json(create_router(AppState::new()), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
