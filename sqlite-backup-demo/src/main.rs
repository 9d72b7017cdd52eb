mod config;
mod db;
mod error;
mod models;
mod routes;
mod state;

use crate::config::AppConfig;
use crate::db::connection::create_pool;
use crate::db::migrate::migrate;
use crate::state::AppState;
use sqlite_backup::processors::{
    BlobUploadOptions, BlobUploadProcessor, CompressOptions, CompressProcessor, HttpUploadOptions,
    HttpUploadProcessor, RetentionOptions, RetentionProcessor,
};
use sqlite_backup::{
    BackupService, HealthMonitor, HealthThresholds, Pipeline, ServiceSettings, SnapshotNaming, SnapshotProducer,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .init();

    tracing::info!("Starting backup demo on port {}", config.port);

    std::fs::create_dir_all(&config.data_dir)?;

    // Initialize database and record startup time so there is some data
    let pool = create_pool(&config.db_path)?;
    migrate(&pool)?;
    {
        let conn = pool.get()?;
        models::activity::record_startup(&conn)?;
    }

    let backup_interval = Duration::from_secs(config.backup_interval_secs);
    let check_interval = Duration::from_secs(config.check_interval_secs);
    let health = Arc::new(HealthMonitor::new(
        HealthThresholds::resolve(None, None, backup_interval)?,
        check_interval,
    ));

    let naming = SnapshotNaming::for_database(&config.db_path, Some(config.backups_dir.as_path()), ".bak", false);
    let pipeline = build_pipeline(&config, &naming)?;
    let service = BackupService::new(
        SnapshotProducer::new(&config.db_path, naming),
        pipeline,
        Arc::clone(&health),
        ServiceSettings {
            backup_interval,
            check_interval,
            use_checksum: true,
        },
    )?;

    let state = Arc::new(AppState::new(pool, config.clone()));
    let app = routes::create_router(state.clone(), health);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    // Started after bind so the first upload can reach /receive-file
    let cancel = CancellationToken::new();
    let service_handle = tokio::spawn(service.run(cancel.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    tracing::info!("Shutting down...");
    cancel.cancel();

    if tokio::time::timeout(Duration::from_secs(10), service_handle).await.is_err() {
        tracing::warn!("Backup service did not stop in time");
    }

    db::connection::close_pool(&state.db);
    tracing::info!("Server stopped");

    Ok(())
}

/// compress → http upload → blob upload (when configured) → retention
fn build_pipeline(config: &AppConfig, naming: &SnapshotNaming) -> sqlite_backup::Result<Pipeline> {
    let mut builder = Pipeline::builder().add_with_priority(0, CompressProcessor::new(CompressOptions::default())?);

    if let Some(url) = &config.upload_url {
        builder = builder.add_with_priority(1, HttpUploadProcessor::new(HttpUploadOptions::new(url.clone()))?);
    }

    if let Some(account_url) = &config.blob_account_url {
        let mut options = BlobUploadOptions::new(account_url.clone(), config.blob_sas_token.clone().unwrap_or_default());
        options.create_container = true;
        builder = builder.add_with_priority(2, BlobUploadProcessor::new(options)?);
    }

    let retention = RetentionOptions {
        mask: Some(format!("{}_*.bak.zst", naming.prefix())),
        keep: 3,
    };
    Ok(builder
        .add_with_priority(3, RetentionProcessor::new(retention, naming)?)
        .build())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    cancel.cancel();
}
