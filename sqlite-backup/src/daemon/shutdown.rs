//! Graceful shutdown handling for SIGTERM and SIGINT.
//!
//! Signals cancel a shared token; the scheduler loop and the HTTP server
//! watch that token and wind down on their own.

use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token cancelled once shutdown starts.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for SIGINT/SIGTERM (or an earlier cancel), then cancel the token.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = self.token.cancelled() => {}
        }

        self.token.cancel();
    }

    /// Wait up to `timeout` for a task watching the token to finish.
    pub async fn join<T>(&self, name: &str, handle: JoinHandle<T>, timeout: Duration) -> Option<T> {
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(value)) => {
                info!("{} stopped", name);
                Some(value)
            }
            Ok(Err(e)) => {
                error!("{} task panicked: {}", name, e);
                None
            }
            Err(_) => {
                warn!("{} shutdown timeout, forcing exit", name);
                None
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
