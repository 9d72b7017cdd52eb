//! Multipart HTTP upload stage.

use crate::pipeline::{Processor, StageOutput};
use crate::utils::errors::{BackupError, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub(crate) const DEFAULT_CONTENT_TYPE: &str = "application/vnd.sqlite3";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpUploadOptions {
    /// Endpoint receiving the multipart POST
    pub url: String,

    /// Form field carrying the file
    #[serde(default = "default_field_name")]
    pub field_name: String,

    #[serde(default = "default_content_type")]
    pub content_type: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Abort the chain on failure instead of logging and continuing
    #[serde(default)]
    pub fail_on_error: bool,
}

fn default_field_name() -> String {
    "backupFile".to_string()
}

pub(crate) fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

pub(crate) fn default_timeout_secs() -> u64 {
    300
}

impl HttpUploadOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            field_name: default_field_name(),
            content_type: default_content_type(),
            timeout_secs: default_timeout_secs(),
            fail_on_error: false,
        }
    }
}

pub struct HttpUploadProcessor {
    options: HttpUploadOptions,
    url: Url,
    client: reqwest::Client,
}

impl HttpUploadProcessor {
    pub fn new(options: HttpUploadOptions) -> Result<Self> {
        let url = Url::parse(&options.url)
            .map_err(|e| BackupError::Config(format!("invalid upload url '{}': {e}", options.url)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs))
            .build()?;
        Ok(Self { options, url, client })
    }

    async fn upload(&self, path: &Path) -> Result<()> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let part = Part::stream_with_length(body, length)
            .file_name(file_name)
            .mime_str(&self.options.content_type)?;
        let form = Form::new().part(self.options.field_name.clone(), part);

        let response = self.client.post(self.url.clone()).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackupError::UploadStatus {
                status,
                url: self.url.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Processor for HttpUploadProcessor {
    fn name(&self) -> &str {
        "http_upload"
    }

    async fn process(&self, path: &Path, cancel: &CancellationToken) -> Result<StageOutput> {
        info!(path = %path.display(), url = %self.url, "Uploading backup file");

        let result = tokio::select! {
            r = self.upload(path) => r,
            _ = cancel.cancelled() => return Err(BackupError::Cancelled),
        };

        match result {
            Ok(()) => {
                info!(path = %path.display(), url = %self.url, "Backup file uploaded");
                Ok(StageOutput::new(path))
            }
            Err(e) => {
                error!(path = %path.display(), url = %self.url, error = %e, "Error while uploading backup file");
                if self.options.fail_on_error {
                    Err(e)
                } else {
                    Ok(StageOutput::with_warning(path, format!("upload to {} failed: {e}", self.url)))
                }
            }
        }
    }
}
