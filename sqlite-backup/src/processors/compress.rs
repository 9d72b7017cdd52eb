//! zstd compression stage.

use crate::pipeline::{Processor, StageOutput};
use crate::utils::errors::{BackupError, Result};
use async_compression::tokio::write::ZstdEncoder;
use async_compression::Level;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressOptions {
    /// zstd level (1-22)
    #[serde(default = "default_level")]
    pub level: i32,

    /// Appended to the input file name
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Keep the uncompressed snapshot next to the archive
    #[serde(default)]
    pub keep_original: bool,
}

fn default_level() -> i32 {
    3
}

fn default_extension() -> String {
    ".zst".to_string()
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            level: default_level(),
            extension: default_extension(),
            keep_original: false,
        }
    }
}

pub struct CompressProcessor {
    options: CompressOptions,
}

impl CompressProcessor {
    pub fn new(options: CompressOptions) -> Result<Self> {
        if !(1..=22).contains(&options.level) {
            return Err(BackupError::Config(format!(
                "compression level {} is outside 1-22",
                options.level
            )));
        }
        if options.extension.is_empty() {
            return Err(BackupError::Config("compression extension must not be empty".into()));
        }
        Ok(Self { options })
    }
}

#[async_trait]
impl Processor for CompressProcessor {
    fn name(&self) -> &str {
        "compress"
    }

    async fn process(&self, path: &Path, cancel: &CancellationToken) -> Result<StageOutput> {
        let output = append_extension(path, &self.options.extension);

        let result = tokio::select! {
            r = compress_file(path, &output, self.options.level) => r,
            _ = cancel.cancelled() => Err(BackupError::Cancelled),
        };

        let (input_size, output_size) = match result {
            Ok(sizes) => sizes,
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&output).await {
                    if remove_err.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %output.display(), error = %remove_err, "Failed to remove partial archive");
                    }
                }
                return Err(e);
            }
        };

        info!(
            input = %path.display(),
            input_size,
            output = %output.display(),
            output_size,
            "Compressed backup"
        );

        if !self.options.keep_original {
            tokio::fs::remove_file(path).await?;
        }

        Ok(StageOutput::new(output))
    }
}

async fn compress_file(input: &Path, output: &Path, level: i32) -> Result<(u64, u64)> {
    let source = tokio::fs::File::open(input).await?;
    let input_size = source.metadata().await?.len();

    let target = tokio::fs::File::create(output).await?;
    let mut encoder = ZstdEncoder::with_quality(target, Level::Precise(level));
    tokio::io::copy(&mut BufReader::new(source), &mut encoder).await?;
    encoder.shutdown().await?;

    let target = encoder.into_inner();
    target.sync_all().await?;
    let output_size = target.metadata().await?.len();

    Ok((input_size, output_size))
}

fn append_extension(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(extension);
    PathBuf::from(name)
}
