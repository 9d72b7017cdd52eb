//! HTTP surface for external monitoring.

pub mod health;

use crate::health::HealthMonitor;
use axum::{routing::get, Router};
use std::sync::Arc;

/// Router exposing `/health` and `/version`, ready to serve or to merge into
/// a host application's router.
pub fn router(monitor: Arc<HealthMonitor>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/version", get(health::version))
        .with_state(monitor)
}
