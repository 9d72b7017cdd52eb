use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub backups_dir: PathBuf,
    pub received_dir: PathBuf,
    pub log_level: String,
    pub backup_interval_secs: u64,
    pub check_interval_secs: u64,
    /// Where the http_upload stage posts; defaults to this app's own receiver
    pub upload_url: Option<String>,
    pub blob_account_url: Option<String>,
    pub blob_sas_token: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let data_dir = PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "data".into()));
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5000);

        Self {
            port,
            db_path: data_dir.join("demo.db"),
            backups_dir: data_dir.join("backup"),
            received_dir: data_dir.join("received"),
            data_dir,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            backup_interval_secs: std::env::var("BACKUP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            check_interval_secs: std::env::var("CHECK_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            upload_url: match std::env::var("UPLOAD_URL") {
                Ok(url) if url.is_empty() => None,
                Ok(url) => Some(url),
                Err(_) => Some(format!("http://localhost:{port}/receive-file")),
            },
            blob_account_url: std::env::var("BLOB_ACCOUNT_URL").ok().filter(|v| !v.is_empty()),
            blob_sas_token: std::env::var("BLOB_SAS_TOKEN").ok(),
        }
    }
}
