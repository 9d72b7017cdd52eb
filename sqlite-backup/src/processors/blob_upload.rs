//! Object-storage upload stage (Azure Blob Storage REST API with a SAS token).

use super::http_upload::{default_content_type, default_timeout_secs};
use crate::pipeline::{Processor, StageOutput};
use crate::utils::errors::{BackupError, Result};
use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const API_VERSION: &str = "2021-08-06";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobUploadOptions {
    /// e.g. `https://myaccount.blob.core.windows.net`
    pub account_url: String,

    #[serde(default = "default_container")]
    pub container: String,

    /// Shared access signature query string, with or without the leading `?`
    #[serde(default)]
    pub sas_token: String,

    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// Create the container first if it does not exist
    #[serde(default)]
    pub create_container: bool,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub fail_on_error: bool,
}

fn default_container() -> String {
    "sqlitebackup".to_string()
}

impl BlobUploadOptions {
    pub fn new(account_url: impl Into<String>, sas_token: impl Into<String>) -> Self {
        Self {
            account_url: account_url.into(),
            container: default_container(),
            sas_token: sas_token.into(),
            content_type: default_content_type(),
            create_container: false,
            timeout_secs: default_timeout_secs(),
            fail_on_error: false,
        }
    }
}

pub struct BlobUploadProcessor {
    options: BlobUploadOptions,
    container_url: Url,
    client: reqwest::Client,
}

impl BlobUploadProcessor {
    pub fn new(options: BlobUploadOptions) -> Result<Self> {
        let invalid = |reason: String| BackupError::Config(format!("invalid blob storage url: {reason}"));

        let mut container_url = Url::parse(&options.account_url).map_err(|e| invalid(e.to_string()))?;
        if options.container.is_empty() {
            return Err(BackupError::Config("blob container name must not be empty".into()));
        }
        container_url
            .path_segments_mut()
            .map_err(|_| invalid(options.account_url.clone()))?
            .pop_if_empty()
            .push(&options.container);

        let sas = options.sas_token.trim_start_matches('?');
        container_url.set_query((!sas.is_empty()).then_some(sas));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs))
            .build()?;

        Ok(Self {
            options,
            container_url,
            client,
        })
    }

    fn blob_url(&self, blob_name: &str) -> Url {
        let mut url = self.container_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(blob_name);
        }
        url
    }

    async fn ensure_container(&self) -> Result<()> {
        let mut url = self.container_url.clone();
        url.query_pairs_mut().append_pair("restype", "container");

        info!(container = %self.options.container, "Creating blob container if it does not already exist");
        let response = self
            .client
            .put(url)
            .header("x-ms-version", API_VERSION)
            .header(CONTENT_LENGTH, 0)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            Ok(())
        } else {
            Err(BackupError::UploadStatus {
                status,
                url: redact(&self.container_url),
            })
        }
    }

    async fn upload(&self, path: &Path) -> Result<()> {
        if self.options.create_container {
            self.ensure_container().await?;
        }

        let blob_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let url = self.blob_url(&blob_name);

        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();

        info!(path = %path.display(), blob = %redact(&url), "Uploading backup to blob storage");
        let response = self
            .client
            .put(url.clone())
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-version", API_VERSION)
            .header(CONTENT_TYPE, &self.options.content_type)
            .header(CONTENT_LENGTH, length)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackupError::UploadStatus {
                status,
                url: redact(&url),
            });
        }
        Ok(())
    }
}

/// URL without the SAS query, safe to log.
fn redact(url: &Url) -> String {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.to_string()
}

#[async_trait]
impl Processor for BlobUploadProcessor {
    fn name(&self) -> &str {
        "blob_upload"
    }

    async fn process(&self, path: &Path, cancel: &CancellationToken) -> Result<StageOutput> {
        let result = tokio::select! {
            r = self.upload(path) => r,
            _ = cancel.cancelled() => return Err(BackupError::Cancelled),
        };

        match result {
            Ok(()) => Ok(StageOutput::new(path)),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Exception while uploading backup file to blob storage");
                if self.options.fail_on_error {
                    Err(e)
                } else {
                    Ok(StageOutput::with_warning(path, format!("blob upload failed: {e}")))
                }
            }
        }
    }
}
