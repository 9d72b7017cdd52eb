use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Local stand-in for a remote backup receiver, target of the demo's
/// http_upload stage.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/receive-file", post(receive_file))
        .layer(DefaultBodyLimit::disable())
}

async fn receive_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let dir = state.config.received_dir.clone();
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    let mut saved = Vec::new();
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let Some(name) = field
            .file_name()
            .and_then(|n| Path::new(n).file_name())
            .map(|n| n.to_string_lossy().into_owned())
        else {
            continue;
        };

        let path = dir.join(&name);
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        let mut size = 0u64;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?
        {
            size += chunk.len() as u64;
            file.write_all(&chunk).await.map_err(|e| anyhow::anyhow!(e))?;
        }
        file.flush().await.map_err(|e| anyhow::anyhow!(e))?;

        tracing::info!("Received backup file {} ({} bytes)", name, size);
        saved.push(json!({ "file": name, "size": size }));
    }

    if saved.is_empty() {
        return Err(AppError::BadRequest("no file in request".into()));
    }
    Ok(Json(json!({ "received": saved })))
}
