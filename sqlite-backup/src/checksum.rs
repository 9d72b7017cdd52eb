//! Content-digest gate that rejects snapshots identical to the last accepted one.

use crate::marker::RetentionMarker;
use crate::utils::errors::{BackupError, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Accept the candidate. `digest` is `None` when digesting is disabled or failed.
    Changed { digest: Option<String> },
    /// Same content as the last accepted snapshot.
    Unchanged { digest: String },
}

impl Verdict {
    pub fn is_changed(&self) -> bool {
        matches!(self, Verdict::Changed { .. })
    }
}

pub struct ChecksumGate {
    enabled: bool,
    marker: RetentionMarker,
    last_pipeline_complete: bool,
}

impl ChecksumGate {
    pub fn new(enabled: bool, marker: RetentionMarker) -> Self {
        Self {
            enabled,
            marker,
            last_pipeline_complete: true,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Decide whether `candidate` is new content.
    ///
    /// Only cancellation is an error: digest I/O failures count as "changed".
    pub async fn evaluate(&self, candidate: &Path, cancel: &CancellationToken) -> Result<Verdict> {
        if !self.enabled {
            return Ok(Verdict::Changed { digest: None });
        }

        let current = match digest_file(candidate, cancel).await {
            Ok(d) => d,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Could not digest candidate, treating it as changed");
                return Ok(Verdict::Changed { digest: None });
            }
        };

        if !self.last_pipeline_complete {
            debug!(digest = %current, "Previous pipeline run did not complete, reprocessing");
            return Ok(Verdict::Changed { digest: Some(current) });
        }

        let last = match self.marker.last_digest().await {
            Ok(last) => last,
            Err(e) => {
                warn!(
                    path = %self.marker.hash_file().display(),
                    error = %e,
                    "Could not read last digest, treating candidate as changed"
                );
                None
            }
        };

        debug!(
            last = last.as_deref().unwrap_or(""),
            current = %current,
            "Comparing snapshot digests"
        );

        match last {
            Some(last) if last.eq_ignore_ascii_case(&current) => Ok(Verdict::Unchanged { digest: current }),
            _ => Ok(Verdict::Changed { digest: Some(current) }),
        }
    }

    /// Make `digest` the new baseline.
    pub async fn accept(&self, digest: &str) -> Result<()> {
        self.marker.set_last_digest(digest).await
    }

    /// Remember whether the pipeline finished; an incomplete run forces the
    /// next candidate through regardless of its digest.
    pub fn record_pipeline_result(&mut self, complete: bool) {
        self.last_pipeline_complete = complete;
    }

    pub fn last_pipeline_complete(&self) -> bool {
        self.last_pipeline_complete
    }
}

/// Uppercase hex SHA-256 of a file.
pub async fn digest_file(path: &Path, cancel: &CancellationToken) -> Result<String> {
    let owned: PathBuf = path.to_path_buf();
    let task = tokio::task::spawn_blocking(move || hash_blocking(&owned));

    tokio::select! {
        joined = task => joined?.map_err(|source| BackupError::Digest {
            path: path.to_path_buf(),
            source,
        }),
        _ = cancel.cancelled() => Err(BackupError::Cancelled),
    }
}

fn hash_blocking(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let count = file.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }
    Ok(hex::encode_upper(hasher.finalize()))
}
