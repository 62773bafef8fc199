//! Health and metrics handlers.

use std::sync::Arc;

use axum::{extract::State, http::header, response::IntoResponse, Json};

use crate::metrics::{render_prometheus, MetricsSnapshot};
use crate::state::AppState;

/// Health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Counters as JSON.
///
/// GET /v1/metrics
pub async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics_snapshot())
}

/// Prometheus metrics endpoint.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = render_prometheus(&state.metrics_snapshot());
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
