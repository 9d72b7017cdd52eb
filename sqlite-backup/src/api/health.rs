//! Health check endpoints.

use crate::health::{HealthMonitor, HealthStatus};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;

/// GET /health - backup health derived from the last successful cycle
///
/// Healthy and Degraded answer 200, Unhealthy answers 503.
pub async fn health(State(monitor): State<Arc<HealthMonitor>>) -> impl IntoResponse {
    let report = monitor.check();
    let code = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (code, Json(report))
}

/// GET /version - Version information endpoint
pub async fn version() -> impl IntoResponse {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
