//! Custom error types for the backup service.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Snapshot into '{path}' failed: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: Box<BackupError>,
    },

    #[error("Digest of '{path}' failed: {source}")]
    Digest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upload to {url} failed with status {status}")]
    UploadStatus {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("Invalid file mask: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl BackupError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            BackupError::Cancelled => true,
            BackupError::Snapshot { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
