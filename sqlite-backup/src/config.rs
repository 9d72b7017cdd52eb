//! Configuration management for the backup service.
//!
//! Loads configuration from a TOML file with environment variable overrides
//! (`SQLITE_BACKUP__BACKUP__CHECK_INTERVAL_SECS=60`).

use crate::health::HealthThresholds;
use crate::processors::ProcessorEntry;
use crate::snapshot::naming::SnapshotNaming;
use crate::utils::errors::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "SQLITE_BACKUP";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,

    #[serde(default)]
    pub backup: BackupConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub api: ApiConfig,

    /// Post-processing stages, see [`ProcessorEntry`]
    #[serde(default)]
    pub processors: Vec<ProcessorEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Source SQLite database file
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Backup folder (default: the database's directory)
    #[serde(default)]
    pub folder: Option<PathBuf>,

    #[serde(default = "default_file_extension")]
    pub file_extension: String,

    #[serde(default = "default_backup_interval_secs")]
    pub backup_interval_secs: u64,

    /// Should be well below the backup interval
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Local instead of UTC timestamps in file names
    #[serde(default)]
    pub use_local_time: bool,

    /// Skip snapshots identical to the previous one
    #[serde(default = "default_true")]
    pub use_checksum: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Unset or 0: 1.25 x backup interval
    #[serde(default)]
    pub healthy_threshold_secs: Option<u64>,

    /// Unset or 0: 2.25 x backup interval
    #[serde(default)]
    pub degraded_threshold_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

// Default values
fn default_file_extension() -> String {
    ".bak".to_string()
}

fn default_backup_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_check_interval_secs() -> u64 {
    15 * 60
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_api_port() -> u16 {
    9980
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            folder: None,
            file_extension: default_file_extension(),
            backup_interval_secs: default_backup_interval_secs(),
            check_interval_secs: default_check_interval_secs(),
            use_local_time: false,
            use_checksum: true,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_api_port(),
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }
        Self::finish(builder)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml));
        Self::finish(builder)
    }

    fn finish(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| BackupError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(BackupError::Config("database.path must be set".into()));
        }
        if self.backup.file_extension.is_empty() {
            return Err(BackupError::Config("backup.file_extension must not be empty".into()));
        }
        if self.backup.backup_interval_secs == 0 || self.backup.check_interval_secs == 0 {
            return Err(BackupError::Config("backup and check intervals must be positive".into()));
        }
        if self.backup.check_interval_secs >= self.backup.backup_interval_secs {
            tracing::warn!(
                check_interval_secs = self.backup.check_interval_secs,
                backup_interval_secs = self.backup.backup_interval_secs,
                "Check interval is not shorter than backup interval, backups will drift"
            );
        }
        self.health_thresholds()?;
        Ok(())
    }

    pub fn backup_interval(&self) -> Duration {
        Duration::from_secs(self.backup.backup_interval_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.backup.check_interval_secs)
    }

    pub fn health_thresholds(&self) -> Result<HealthThresholds> {
        HealthThresholds::resolve(
            self.health.healthy_threshold_secs.map(Duration::from_secs),
            self.health.degraded_threshold_secs.map(Duration::from_secs),
            self.backup_interval(),
        )
    }

    pub fn naming(&self) -> SnapshotNaming {
        SnapshotNaming::for_database(
            &self.database.path,
            self.backup.folder.as_deref(),
            &self.backup.file_extension,
            self.backup.use_local_time,
        )
    }
}
