//! Online snapshots of the source database.
//!
//! Uses SQLite's `VACUUM INTO` over a read-only connection, so readers and
//! writers on the source keep running. The copy is written to a hidden
//! `.partial` file and renamed onto its final name only once complete.

pub mod naming;

use crate::utils::errors::{BackupError, Result};
use chrono::{DateTime, Utc};
use naming::SnapshotNaming;
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SnapshotProducer {
    source: PathBuf,
    naming: SnapshotNaming,
}

impl SnapshotProducer {
    pub fn new(source: impl Into<PathBuf>, naming: SnapshotNaming) -> Self {
        Self {
            source: source.into(),
            naming,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn naming(&self) -> &SnapshotNaming {
        &self.naming
    }

    /// Create a snapshot named after `at` and return its path.
    ///
    /// On failure or cancellation no file is left behind.
    pub async fn create(&self, at: DateTime<Utc>, cancel: &CancellationToken) -> Result<PathBuf> {
        let target = self.naming.path_for(at);
        info!(path = %target.display(), "Performing backup");

        self.produce(&target, cancel)
            .await
            .map_err(|e| BackupError::Snapshot {
                path: target.clone(),
                source: Box::new(e),
            })?;

        Ok(target)
    }

    async fn produce(&self, target: &Path, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }
        if tokio::fs::try_exists(target).await? {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "snapshot file already exists",
            )
            .into());
        }

        let partial = partial_path(target);
        let result = self.vacuum(&partial, cancel).await;

        let result = match result {
            Ok(()) => tokio::fs::rename(&partial, target).await.map_err(BackupError::from),
            Err(e) => Err(e),
        };

        if result.is_err() {
            remove_if_exists(&partial).await;
        }
        result
    }

    async fn vacuum(&self, partial: &Path, cancel: &CancellationToken) -> Result<()> {
        let (handle_tx, handle_rx) = oneshot::channel();
        let source = self.source.clone();
        let dest = partial.to_path_buf();
        let task_cancel = cancel.clone();

        let mut task = tokio::task::spawn_blocking(move || {
            vacuum_into(&source, &dest, &task_cancel, handle_tx)
        });

        tokio::select! {
            joined = &mut task => joined?,
            _ = cancel.cancelled() => {
                // The engine call cannot be dropped; interrupt it and wait for the
                // blocking task so the partial file is gone before returning.
                if let Ok(handle) = handle_rx.await {
                    handle.interrupt();
                }
                let _ = task.await;
                debug!(path = %partial.display(), "Snapshot interrupted by cancellation");
                Err(BackupError::Cancelled)
            }
        }
    }
}

fn vacuum_into(
    source: &Path,
    dest: &Path,
    cancel: &CancellationToken,
    handle_tx: oneshot::Sender<InterruptHandle>,
) -> Result<()> {
    let conn = Connection::open_with_flags(
        source,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let _ = handle_tx.send(conn.get_interrupt_handle());

    if cancel.is_cancelled() {
        return Err(BackupError::Cancelled);
    }

    conn.execute("VACUUM INTO ?1", [dest.to_string_lossy().into_owned()])?;
    Ok(())
}

fn partial_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.partial"))
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial snapshot"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial snapshot"),
    }
}
