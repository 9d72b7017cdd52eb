//! Restart-persisted scheduling state, stored as sidecar files in the backup folder.

use crate::snapshot::naming::SnapshotNaming;
use crate::utils::errors::Result;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const LAST_BACKUP_EXTENSION: &str = ".lastBackup";
pub const HASH_FILE_EXTENSION: &str = ".lastHash";

/// Last-success time and last accepted digest for one source database.
#[derive(Debug, Clone)]
pub struct RetentionMarker {
    last_backup_file: PathBuf,
    hash_file: PathBuf,
    naming: SnapshotNaming,
}

impl RetentionMarker {
    pub fn new(naming: &SnapshotNaming) -> Self {
        Self {
            last_backup_file: naming.sidecar(LAST_BACKUP_EXTENSION),
            hash_file: naming.sidecar(HASH_FILE_EXTENSION),
            naming: naming.clone(),
        }
    }

    pub fn hash_file(&self) -> &Path {
        &self.hash_file
    }

    /// Time of the last completed cycle.
    ///
    /// Falls back to the newest snapshot file name when the sidecar is
    /// missing or unreadable; `None` means a backup is due right away.
    pub async fn last_success(&self) -> Option<DateTime<Utc>> {
        match tokio::fs::read_to_string(&self.last_backup_file).await {
            Ok(content) => match DateTime::parse_from_rfc3339(content.trim()) {
                Ok(t) => return Some(t.with_timezone(&Utc)),
                Err(e) => warn!(
                    path = %self.last_backup_file.display(),
                    error = %e,
                    "Ignoring unparsable last backup marker"
                ),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.last_backup_file.display(),
                error = %e,
                "Failed to read last backup marker"
            ),
        }

        let naming = self.naming.clone();
        let recovered = tokio::task::spawn_blocking(move || naming.latest_timestamp())
            .await
            .ok()
            .flatten();
        if let Some(t) = recovered {
            debug!(timestamp = %t, "Recovered last backup time from snapshot file names");
        }
        recovered
    }

    pub async fn set_last_success(&self, at: DateTime<Utc>) -> Result<()> {
        write_atomic(&self.last_backup_file, &at.to_rfc3339()).await?;
        Ok(())
    }

    /// Digest of the last accepted snapshot; `Ok(None)` on first run.
    pub async fn last_digest(&self) -> std::io::Result<Option<String>> {
        match tokio::fs::read_to_string(&self.hash_file).await {
            Ok(content) => {
                let digest = content.trim();
                Ok((!digest.is_empty()).then(|| digest.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn set_last_digest(&self, digest: &str) -> Result<()> {
        write_atomic(&self.hash_file, digest).await?;
        Ok(())
    }
}

async fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn marker(dir: &TempDir) -> RetentionMarker {
        RetentionMarker::new(&SnapshotNaming::new(dir.path(), "app", ".bak", false))
    }

    #[tokio::test]
    async fn test_empty_folder_has_no_history() {
        let dir = TempDir::new().unwrap();
        let marker = marker(&dir);

        assert!(marker.last_success().await.is_none());
        assert!(marker.last_digest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_values_survive_new_instance() {
        let dir = TempDir::new().unwrap();
        let t = DateTime::parse_from_rfc3339("2024-05-01T08:30:00Z").unwrap().with_timezone(&Utc);
        marker(&dir).set_last_success(t).await.unwrap();
        marker(&dir).set_last_digest("ABCDEF").await.unwrap();

        let reopened = marker(&dir);
        assert_eq!(reopened.last_success().await, Some(t));
        assert_eq!(reopened.last_digest().await.unwrap().as_deref(), Some("ABCDEF"));
        assert!(dir.path().join("app.lastHash").exists());
        assert!(!dir.path().join("app.lastHash.tmp").exists());
    }

    #[tokio::test]
    async fn test_falls_back_to_newest_snapshot_name() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("app_20240101000000.bak"), b"a").unwrap();
        std::fs::write(dir.path().join("app_20240301000000.bak"), b"b").unwrap();
        std::fs::write(dir.path().join("app.lastBackup"), b"garbage").unwrap();

        let expected = DateTime::parse_from_rfc3339("2024-03-01T00:00:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(marker(&dir).last_success().await, Some(expected));
    }
}
