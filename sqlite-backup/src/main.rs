//! SQLite Backup - Main entry point
//!
//! Runs the backup scheduler and serves its health endpoint.

use anyhow::Result;
use clap::Parser;
use sqlite_backup::{api, daemon::ShutdownCoordinator, utils, BackupService, Config, HealthMonitor};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Health endpoint port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting sqlite-backup v{} (database: {})",
        env!("CARGO_PKG_VERSION"),
        config.database.path.display()
    );

    let health = Arc::new(HealthMonitor::new(config.health_thresholds()?, config.check_interval()));
    let service = BackupService::from_config(&config, Arc::clone(&health))?;

    let shutdown = ShutdownCoordinator::new();

    let service_handle = tokio::spawn(service.run(shutdown.token()));

    let server_handle = if config.api.enabled {
        let port = args.port.unwrap_or(config.api.port);
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr).await?;

        tracing::info!("Health endpoint: http://{}/health", addr);
        tracing::info!("Version endpoint: http://{}/version", addr);

        let app = api::router(health).layer(tower_http::trace::TraceLayer::new_for_http());
        let token = shutdown.token();
        Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
        }))
    } else {
        None
    };

    // Wait for shutdown signal
    shutdown.wait_for_signal().await;

    shutdown.join("Backup service", service_handle, Duration::from_secs(10)).await;

    if let Some(handle) = server_handle {
        if let Some(Err(e)) = shutdown.join("HTTP server", handle, Duration::from_secs(5)).await {
            tracing::error!("Server error during shutdown: {}", e);
        }
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}
