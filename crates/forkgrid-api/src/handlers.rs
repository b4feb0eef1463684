//! Health and metrics handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::ApiState;

// ── Health ─────────────────────────────────────────────────────

/// GET /health
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.reports.borrow().health.clone();
    let status = if snapshot.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(snapshot))
}

// ── Metrics ────────────────────────────────────────────────────

/// GET /metrics
pub async fn metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let report = state.reports.borrow().clone();
    Json(serde_json::json!({
        "status": report.health.status,
        "phase": report.phase,
        "fleet": report.fleet,
        "workers": report.workers,
        "lastScaling": report.last_scaling,
        "timestamp": report.health.timestamp,
    }))
}

/// GET /metrics/prometheus
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = forkgrid_metrics::render_prometheus(&state.reports.borrow());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
