//! SQLite Backup Library
//!
//! Periodic online snapshots of a live SQLite database, deduplicated by
//! content digest and fed through an ordered chain of processors.

pub mod api;
pub mod checksum;
pub mod clock;
pub mod config;
pub mod daemon;
pub mod health;
pub mod marker;
pub mod pipeline;
pub mod processors;
pub mod service;
pub mod snapshot;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use health::{HealthMonitor, HealthReport, HealthStatus, HealthThresholds};
pub use pipeline::{Pipeline, PipelineBuilder, Processor, StageOutput};
pub use service::{BackupService, CycleOutcome, ServiceSettings};
pub use snapshot::{naming::SnapshotNaming, SnapshotProducer};
pub use utils::errors::{BackupError, Result};
