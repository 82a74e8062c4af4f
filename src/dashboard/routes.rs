//! Dashboard API route handlers.
//!
//! All endpoints return JSON, backed directly by the `Store`. Errors
//! carry `{scan_id, rejection_reason, kill_switch_active}` context so an
//! operator can diagnose a failed call without reading logs.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::engine::analysis::{self, AnalysisSettings, MarketAnalysisReport};
use crate::engine::executor::kill_switch_active;
use crate::engine::scanner::{ScanResult, Scanner};
use crate::ensemble::AnalystDeps;
use crate::errors::EngineError;
use crate::platforms::VenueClient;
use crate::storage::Store;
use crate::types::{CalibrationRecord, EdgeAnalysis, Market, MarketCategory, Position, PositionStatus, Venue};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub store: Arc<Store>,
    pub venues: Arc<HashMap<Venue, Box<dyn VenueClient>>>,
    pub analyst_deps: AnalystDeps,
    pub analysis_settings: AnalysisSettings,
    pub min_market_volume: Decimal,
    pub max_days_to_expiry: i64,
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Error contract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub scan_id: Option<String>,
    pub rejection_reason: Option<String>,
    pub kill_switch_active: bool,
}

fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::AuthConfigError(_) => StatusCode::UNAUTHORIZED,
        EngineError::GateRejection(_) | EngineError::SafetyBlock(_) => StatusCode::CONFLICT,
        EngineError::TransientVenueError { .. } => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::PermanentVenueError { .. } => StatusCode::BAD_GATEWAY,
        EngineError::ConsistencyError(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Wraps an `EngineError` with the scan_id/kill-switch context the
/// external interface contract requires on every error body.
pub struct ApiError {
    scan_id: Option<String>,
    kill_switch_active: bool,
    inner: EngineError,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.inner);
        let body = ErrorBody {
            scan_id: self.scan_id,
            rejection_reason: Some(self.inner.to_string()),
            kill_switch_active: self.kill_switch_active,
        };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub db: String,
    pub timestamp: String,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.store.list_active_markets().await {
        Ok(_) => (
            StatusCode::OK,
            Json(HealthResponse { status: "ok".to_string(), db: "ok".to_string(), timestamp: chrono::Utc::now().to_rfc3339() }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse { status: "degraded".to_string(), db: e.to_string(), timestamp: chrono::Utc::now().to_rfc3339() }),
        ),
    }
}

// ---------------------------------------------------------------------------
// Markets
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct MarketsQuery {
    pub platform: Option<String>,
    pub category: Option<String>,
    pub min_volume: Option<Decimal>,
    pub sort_by: Option<String>,
    pub limit: Option<i64>,
}

fn parse_venue(s: &str) -> Option<Venue> {
    match s.to_lowercase().as_str() {
        "kalshi" => Some(Venue::Kalshi),
        "polymarket" => Some(Venue::Polymarket),
        _ => None,
    }
}

fn parse_category(s: &str) -> Option<MarketCategory> {
    MarketCategory::ALL.iter().find(|c| c.as_str() == s.to_lowercase()).copied()
}

/// GET /markets?platform&limit
pub async fn list_markets(State(state): State<AppState>, Query(q): Query<MarketsQuery>) -> Result<Json<Vec<Market>>, ApiError> {
    let venue = q.platform.as_deref().and_then(parse_venue);
    let category = q.category.as_deref().and_then(parse_category);
    let limit = q.limit.unwrap_or(100);

    let markets = state
        .store
        .list_markets_filtered(venue, category, q.min_volume, q.sort_by.as_deref(), limit)
        .await
        .map_err(|e| ApiError { scan_id: None, kill_switch_active: false, inner: e })?;
    Ok(Json(markets))
}

/// GET /markets/{id}?platform=...
pub async fn get_market(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Market>, ApiError> {
    let market = state.store.get_market(id).await.map_err(|e| ApiError { scan_id: None, kill_switch_active: false, inner: e })?;
    market.map(Json).ok_or_else(|| ApiError {
        scan_id: None,
        kill_switch_active: false,
        inner: EngineError::ConsistencyError(format!("market {id} not found")),
    })
}

// ---------------------------------------------------------------------------
// Scan
// ---------------------------------------------------------------------------

/// POST /scan/run
pub async fn run_scan(State(state): State<AppState>) -> Result<Json<ScanResult>, ApiError> {
    let scan_id = format!("scan-{}", uuid::Uuid::new_v4());
    let scanner = Scanner::new(&state.store, &state.venues, state.min_market_volume, state.max_days_to_expiry);
    let result = scanner.scan(scan_id).await;
    Ok(Json(result))
}

/// GET /scan/results?platform&category&min_volume&sort_by
pub async fn scan_results(State(state): State<AppState>, Query(q): Query<MarketsQuery>) -> Result<Json<Vec<Market>>, ApiError> {
    list_markets(State(state), Query(q)).await
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

/// GET /scan/history
pub async fn scan_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Vec<crate::storage::ScanHistoryEntry>>, ApiError> {
    let entries = state
        .store
        .scan_history(q.limit.unwrap_or(50))
        .await
        .map_err(|e| ApiError { scan_id: None, kill_switch_active: false, inner: e })?;
    Ok(Json(entries))
}

// ---------------------------------------------------------------------------
// Analyze
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AnalyzeQuery {
    #[serde(default)]
    pub execute: bool,
}

/// POST /analyze/{market_id}?execute=bool
pub async fn analyze_market(
    State(state): State<AppState>,
    Path(market_id): Path<i64>,
    Query(q): Query<AnalyzeQuery>,
) -> Result<Json<MarketAnalysisReport>, ApiError> {
    let scan_id = format!("adhoc-{}", uuid::Uuid::new_v4());
    let result =
        analysis::analyze_market(&state.store, &state.venues, &state.analyst_deps, &scan_id, market_id, &state.analysis_settings, q.execute).await;

    match result {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            let tripped = kill_switch_active(&state.store, state.analysis_settings.bankroll, state.analysis_settings.max_daily_drawdown_pct)
                .await
                .unwrap_or(false);
            Err(ApiError { scan_id: Some(scan_id), kill_switch_active: tripped, inner: e })
        }
    }
}

/// GET /analyze/debates?limit
pub async fn recent_debates(State(state): State<AppState>, Query(q): Query<HistoryQuery>) -> Result<Json<Vec<EdgeAnalysis>>, ApiError> {
    let debates = state
        .store
        .recent_debates(q.limit.unwrap_or(20))
        .await
        .map_err(|e| ApiError { scan_id: None, kill_switch_active: false, inner: e })?;
    Ok(Json(debates))
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PositionsQuery {
    pub status: Option<String>,
    pub platform: Option<String>,
}

fn parse_status(s: &str) -> Option<PositionStatus> {
    match s.to_lowercase().as_str() {
        "pending" => Some(PositionStatus::Pending),
        "open" => Some(PositionStatus::Open),
        "closed_win" => Some(PositionStatus::ClosedWin),
        "closed_loss" => Some(PositionStatus::ClosedLoss),
        "closed_early" => Some(PositionStatus::ClosedEarly),
        "cancelled" => Some(PositionStatus::Cancelled),
        _ => None,
    }
}

/// GET /positions?status&platform
pub async fn list_positions(State(state): State<AppState>, Query(q): Query<PositionsQuery>) -> Result<Json<Vec<Position>>, ApiError> {
    let status = q.status.as_deref().and_then(parse_status);
    let venue = q.platform.as_deref().and_then(parse_venue);
    let positions = state
        .store
        .list_positions_filtered(status, venue)
        .await
        .map_err(|e| ApiError { scan_id: None, kill_switch_active: false, inner: e })?;
    Ok(Json(positions))
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionsSummary {
    pub open: usize,
    pub pending: usize,
    pub closed_win: usize,
    pub closed_loss: usize,
    pub closed_early: usize,
    pub cancelled: usize,
    pub total_realized_pnl: Decimal,
}

/// GET /positions/summary
pub async fn positions_summary(State(state): State<AppState>) -> Result<Json<PositionsSummary>, ApiError> {
    let positions =
        state.store.list_positions_filtered(None, None).await.map_err(|e| ApiError { scan_id: None, kill_switch_active: false, inner: e })?;

    let mut summary = PositionsSummary {
        open: 0,
        pending: 0,
        closed_win: 0,
        closed_loss: 0,
        closed_early: 0,
        cancelled: 0,
        total_realized_pnl: Decimal::ZERO,
    };
    for p in &positions {
        match p.status {
            PositionStatus::Open => summary.open += 1,
            PositionStatus::Pending => summary.pending += 1,
            PositionStatus::ClosedWin => summary.closed_win += 1,
            PositionStatus::ClosedLoss => summary.closed_loss += 1,
            PositionStatus::ClosedEarly => summary.closed_early += 1,
            PositionStatus::Cancelled => summary.cancelled += 1,
        }
        if let Some(pnl) = p.pnl_dollars {
            summary.total_realized_pnl += pnl;
        }
    }
    Ok(Json(summary))
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyPnlResponse {
    pub realized_pnl_today: Decimal,
    pub kill_switch_active: bool,
}

/// GET /positions/daily-pnl
pub async fn daily_pnl(State(state): State<AppState>) -> Result<Json<DailyPnlResponse>, ApiError> {
    let realized = state.store.realized_pnl_today().await.map_err(|e| ApiError { scan_id: None, kill_switch_active: false, inner: e })?;
    let tripped = kill_switch_active(&state.store, state.analysis_settings.bankroll, state.analysis_settings.max_daily_drawdown_pct)
        .await
        .unwrap_or(false);
    Ok(Json(DailyPnlResponse { realized_pnl_today: realized, kill_switch_active: tripped }))
}

#[derive(Debug, Deserialize)]
pub struct ClosePositionQuery {
    pub exit_price: Decimal,
}

/// POST /positions/{id}/close?exit_price
pub async fn close_position(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(q): Query<ClosePositionQuery>,
) -> Result<Json<Position>, ApiError> {
    let position = state
        .store
        .get_position(id)
        .await
        .map_err(|e| ApiError { scan_id: None, kill_switch_active: false, inner: e })?
        .ok_or_else(|| ApiError {
            scan_id: None,
            kill_switch_active: false,
            inner: EngineError::ConsistencyError(format!("position {id} not found")),
        })?;

    let lifecycle = crate::engine::lifecycle::LifecycleManager::new(&state.store, &state.venues);
    lifecycle.close_manually(&position, q.exit_price).await.map_err(|e| ApiError { scan_id: None, kill_switch_active: false, inner: e })?;

    let updated = state
        .store
        .get_position(id)
        .await
        .map_err(|e| ApiError { scan_id: None, kill_switch_active: false, inner: e })?
        .ok_or_else(|| ApiError {
            scan_id: None,
            kill_switch_active: false,
            inner: EngineError::ConsistencyError(format!("position {id} vanished after close")),
        })?;
    Ok(Json(updated))
}

// ---------------------------------------------------------------------------
// Calibration
// ---------------------------------------------------------------------------

/// GET /calibration
pub async fn calibration(State(state): State<AppState>) -> Result<Json<Vec<CalibrationRecord>>, ApiError> {
    let records = state.store.list_calibration_records().await.map_err(|e| ApiError { scan_id: None, kill_switch_active: false, inner: e })?;
    Ok(Json(records))
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentCalibration {
    pub role: String,
    pub total_predictions: usize,
    pub overall_brier: f64,
    pub diagnosis: String,
}

/// GET /calibration/agents — per-role calibration, reconstructed from
/// whichever of research/base-rate/model estimates each record carries
/// and reduced with the same `Calibrator` the offline tooling uses.
pub async fn calibration_agents(State(state): State<AppState>) -> Result<Json<Vec<AgentCalibration>>, ApiError> {
    use crate::backtest::calibration::{CalibrationPoint, Calibrator};

    let records = state.store.list_calibration_records().await.map_err(|e| ApiError { scan_id: None, kill_switch_active: false, inner: e })?;

    let roles: [(&str, fn(&CalibrationRecord) -> Option<Decimal>); 3] =
        [("research", |r| r.research_estimate), ("base_rate", |r| r.base_rate_estimate), ("model", |r| r.model_estimate)];

    let mut out = Vec::new();
    for (role, pick) in roles {
        let mut cal = Calibrator::new();
        for r in &records {
            if let Some(p) = pick(r) {
                cal.add_point(CalibrationPoint {
                    market_id: r.market_id.to_string(),
                    category: r.category,
                    estimated_probability: p.to_string().parse().unwrap_or(0.5),
                    resolved_yes: r.actual_outcome,
                });
            }
        }
        if cal.count() == 0 {
            continue;
        }
        let report = cal.report();
        out.push(AgentCalibration {
            role: role.to_string(),
            total_predictions: report.total_predictions,
            overall_brier: report.overall_brier,
            diagnosis: format!("{:?}", report.diagnosis),
        });
    }
    Ok(Json(out))
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationChartPoint {
    pub resolved_at: String,
    pub system_probability: Decimal,
    pub actual_outcome: bool,
    pub brier_score: Decimal,
}

/// GET /calibration/chart — one point per resolved market, oldest first.
pub async fn calibration_chart(State(state): State<AppState>) -> Result<Json<Vec<CalibrationChartPoint>>, ApiError> {
    let mut records = state.store.list_calibration_records().await.map_err(|e| ApiError { scan_id: None, kill_switch_active: false, inner: e })?;
    records.sort_by_key(|r| r.resolved_at);

    let points = records
        .into_iter()
        .map(|r| CalibrationChartPoint {
            resolved_at: r.resolved_at.to_rfc3339(),
            system_probability: r.system_probability,
            actual_outcome: r.actual_outcome,
            brier_score: r.brier_score,
        })
        .collect();
    Ok(Json(points))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_venue() {
        assert_eq!(parse_venue("Kalshi"), Some(Venue::Kalshi));
        assert_eq!(parse_venue("bogus"), None);
    }

    #[test]
    fn test_parse_category() {
        assert_eq!(parse_category("economics"), Some(MarketCategory::Economics));
        assert_eq!(parse_category("bogus"), None);
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("closed_win"), Some(PositionStatus::ClosedWin));
        assert_eq!(parse_status("bogus"), None);
    }

    #[test]
    fn test_status_for_mapping() {
        assert_eq!(status_for(&EngineError::AuthConfigError("x".into())), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(&EngineError::SafetyBlock("x".into())), StatusCode::CONFLICT);
        assert_eq!(status_for(&EngineError::ConsistencyError("x".into())), StatusCode::NOT_FOUND);
    }
}
