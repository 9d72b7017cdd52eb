//! Concrete pipeline stages and their configuration.

pub mod blob_upload;
pub mod compress;
pub mod http_upload;
pub mod retention;

use crate::pipeline::{Pipeline, Processor};
use crate::snapshot::naming::SnapshotNaming;
use crate::utils::errors::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use blob_upload::{BlobUploadOptions, BlobUploadProcessor};
pub use compress::{CompressOptions, CompressProcessor};
pub use http_upload::{HttpUploadOptions, HttpUploadProcessor};
pub use retention::{RetentionOptions, RetentionProcessor};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessorSettings {
    Compress(CompressOptions),
    HttpUpload(HttpUploadOptions),
    BlobUpload(BlobUploadOptions),
    Retention(RetentionOptions),
}

impl ProcessorSettings {
    pub fn build(&self, naming: &SnapshotNaming) -> Result<Arc<dyn Processor>> {
        Ok(match self {
            ProcessorSettings::Compress(o) => Arc::new(CompressProcessor::new(o.clone())?),
            ProcessorSettings::HttpUpload(o) => Arc::new(HttpUploadProcessor::new(o.clone())?),
            ProcessorSettings::BlobUpload(o) => Arc::new(BlobUploadProcessor::new(o.clone())?),
            ProcessorSettings::Retention(o) => Arc::new(RetentionProcessor::new(o.clone(), naming)?),
        })
    }
}

/// One `[[processors]]` entry. Without an explicit priority the entry takes
/// the slot after the previous one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorEntry {
    #[serde(default)]
    pub priority: Option<i32>,

    #[serde(flatten)]
    pub settings: ProcessorSettings,
}

pub fn build_pipeline(entries: &[ProcessorEntry], naming: &SnapshotNaming) -> Result<Pipeline> {
    let mut builder = Pipeline::builder();
    for entry in entries {
        let processor = entry.settings.build(naming)?;
        let priority = entry.priority.unwrap_or_else(|| builder.next_priority());
        builder = builder.add_shared(priority, processor);
    }
    Ok(builder.build())
}
