//! Retention stage: keep the newest N files matching a mask, delete the rest.

use crate::pipeline::{Processor, StageOutput};
use crate::snapshot::naming::SnapshotNaming;
use crate::utils::errors::Result;
use async_trait::async_trait;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionOptions {
    /// Glob over file names in the backup folder. Defaults to the snapshot
    /// naming scheme plus any derived suffix.
    #[serde(default)]
    pub mask: Option<String>,

    /// Number of newest matching files to keep
    pub keep: usize,
}

pub struct RetentionProcessor {
    pattern: Pattern,
    keep: usize,
}

impl RetentionProcessor {
    pub fn new(options: RetentionOptions, naming: &SnapshotNaming) -> Result<Self> {
        let mask = options.mask.unwrap_or_else(|| naming.retention_mask());
        Ok(Self {
            pattern: Pattern::new(&mask)?,
            keep: options.keep,
        })
    }
}

#[async_trait]
impl Processor for RetentionProcessor {
    fn name(&self) -> &str {
        "retention"
    }

    async fn process(&self, path: &Path, _cancel: &CancellationToken) -> Result<StageOutput> {
        let folder = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let pattern = self.pattern.clone();
        let keep = self.keep;

        let deleted = tokio::task::spawn_blocking(move || prune(&folder, &pattern, keep)).await??;
        for file in &deleted {
            info!(path = %file.display(), "Deleted old backup file");
        }

        Ok(StageOutput::new(path))
    }
}

fn prune(folder: &Path, pattern: &Pattern, keep: usize) -> std::io::Result<Vec<PathBuf>> {
    let mut names: Vec<String> = std::fs::read_dir(folder)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| pattern.matches(name))
        .collect();

    // Newest first: snapshot names sort chronologically.
    names.sort_by(|a, b| b.cmp(a));

    let mut deleted = Vec::new();
    for name in names.into_iter().skip(keep) {
        let path = folder.join(name);
        std::fs::remove_file(&path)?;
        deleted.push(path);
    }
    Ok(deleted)
}
