use crate::error::AppError;
use crate::models::activity::{self, Activity};
use crate::state::AppState;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(index))
}

#[derive(Serialize)]
pub struct IndexResponse {
    pub message: &'static str,
    pub activity: Activity,
}

/// Every visit is a write, so consecutive backups differ.
async fn index(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<IndexResponse>, AppError> {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let db = state.db.clone();
    let activity = tokio::task::spawn_blocking(move || {
        let conn = db.get()?;
        activity::record_visit(&conn, user_agent.as_deref())?;
        activity::summary(&conn)
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    Ok(Json(IndexResponse {
        message: "This web app does not do anything, it just backs up its SQLite database. See the console log.",
        activity,
    }))
}
