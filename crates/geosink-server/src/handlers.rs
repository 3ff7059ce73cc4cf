// HTTP handlers for the admin surface

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::AppState;

/// GET /health - deep health check
pub(crate) async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.check().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

/// GET /ready - readiness check
pub(crate) async fn ready_check() -> impl IntoResponse {
    // Components are wired before the listener binds.
    (StatusCode::OK, Json(json!({"status": "ready"})))
}

/// GET /stats - scheduler statistics snapshot
pub(crate) async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.scheduler.stats()))
}
