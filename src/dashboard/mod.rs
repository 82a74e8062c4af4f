//! Dashboard — Axum JSON API for operator visibility and on-demand
//! control (manual scans, ad-hoc analysis, manual position closes).
//! CORS enabled for local development.

pub mod routes;

use anyhow::Result;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::info;

use routes::AppState;

/// Start the dashboard web server.
///
/// This spawns a background task — it doesn't block.
pub fn spawn_dashboard(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);

    tokio::spawn(async move {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        info!(port, "dashboard API starting on http://0.0.0.0:{port}");

        let listener = tokio::net::TcpListener::bind(addr).await.expect("failed to bind dashboard port");

        axum::serve(listener, app).await.expect("dashboard server error");
    });

    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin("*".parse::<HeaderValue>().unwrap())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(routes::health))
        .route("/markets", get(routes::list_markets))
        .route("/markets/:id", get(routes::get_market))
        .route("/scan/run", post(routes::run_scan))
        .route("/scan/results", get(routes::scan_results))
        .route("/scan/history", get(routes::scan_history))
        .route("/analyze/:market_id", post(routes::analyze_market))
        .route("/analyze/debates", get(routes::recent_debates))
        .route("/positions", get(routes::list_positions))
        .route("/positions/summary", get(routes::positions_summary))
        .route("/positions/daily-pnl", get(routes::daily_pnl))
        .route("/positions/:id/close", post(routes::close_position))
        .route("/calibration", get(routes::calibration))
        .route("/calibration/agents", get(routes::calibration_agents))
        .route("/calibration/chart", get(routes::calibration_chart))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::analysis::AnalysisSettings;
    use crate::ensemble::AnalystDeps;
    use crate::llm::openclaw::OpenclawClient;
    use crate::llm::tavily::TavilyClient;
    use crate::storage::{connect, Store};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn test_state() -> AppState {
        let pool = connect("sqlite::memory:").await.unwrap();
        let store = Arc::new(Store::new(pool));
        let venues = Arc::new(HashMap::new());
        let llm = Arc::new(OpenclawClient::new("http://localhost".to_string(), "test-key".to_string(), "test-model".to_string()).unwrap());
        let search = Arc::new(TavilyClient::new("test-key".to_string()).unwrap());

        Arc::new(routes::DashboardState {
            store,
            venues,
            analyst_deps: AnalystDeps { llm, search },
            analysis_settings: AnalysisSettings {
                bankroll: dec!(10000),
                min_edge: dec!(0.05),
                max_position_pct: dec!(0.05),
                max_daily_drawdown_pct: dec!(0.02),
            },
            min_market_volume: dec!(200),
            max_days_to_expiry: 30,
        })
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = build_router(test_state().await);
        let resp = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_markets_endpoint_empty() {
        let app = build_router(test_state().await);
        let resp = app.oneshot(Request::builder().uri("/markets").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let markets: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert!(markets.is_empty());
    }

    #[tokio::test]
    async fn test_positions_summary_endpoint() {
        let app = build_router(test_state().await);
        let resp = app.oneshot(Request::builder().uri("/positions/summary").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_daily_pnl_endpoint() {
        let app = build_router(test_state().await);
        let resp = app.oneshot(Request::builder().uri("/positions/daily-pnl").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_calibration_endpoint_empty() {
        let app = build_router(test_state().await);
        let resp = app.oneshot(Request::builder().uri("/calibration").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_market_not_found() {
        let app = build_router(test_state().await);
        let resp = app.oneshot(Request::builder().uri("/markets/999").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
