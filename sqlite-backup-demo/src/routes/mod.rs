pub mod home;
pub mod receive;

use crate::state::AppState;
use axum::Router;
use sqlite_backup::HealthMonitor;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>, health: Arc<HealthMonitor>) -> Router {
    Router::new()
        .merge(home::router())
        .merge(receive::router())
        .with_state(state)
        .merge(sqlite_backup::api::router(health))
        .layer(TraceLayer::new_for_http())
}
