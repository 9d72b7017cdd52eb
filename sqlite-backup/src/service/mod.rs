//! The scheduling loop tying the snapshot producer, checksum gate, pipeline
//! and health monitor together.
//!
//! One sequential task: a cycle (snapshot, gate, full pipeline) always
//! finishes before the next due check starts.

use crate::checksum::{ChecksumGate, Verdict};
use crate::clock::{self, SharedClock};
use crate::config::Config;
use crate::health::HealthMonitor;
use crate::marker::RetentionMarker;
use crate::pipeline::{Pipeline, PipelineReport};
use crate::processors;
use crate::snapshot::SnapshotProducer;
use crate::utils::errors::{BackupError, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub backup_interval: Duration,
    pub check_interval: Duration,
    pub use_checksum: bool,
}

/// What a single pass of the loop did.
#[derive(Debug)]
pub enum CycleOutcome {
    NotDue { next_due: DateTime<Utc> },
    SnapshotFailed(String),
    /// Candidate matched the last accepted digest and was deleted.
    Unchanged { digest: String },
    Processed { snapshot: PathBuf, report: PipelineReport },
    PipelineFailed { snapshot: PathBuf, stage: String, error: String },
    Cancelled,
}

pub struct BackupService {
    producer: SnapshotProducer,
    gate: ChecksumGate,
    marker: RetentionMarker,
    pipeline: Pipeline,
    health: Arc<HealthMonitor>,
    clock: SharedClock,
    backup_interval: Duration,
    check_interval: Duration,
}

impl BackupService {
    pub fn new(
        producer: SnapshotProducer,
        pipeline: Pipeline,
        health: Arc<HealthMonitor>,
        settings: ServiceSettings,
    ) -> Result<Self> {
        Self::with_clock(producer, pipeline, health, settings, clock::system())
    }

    pub fn with_clock(
        producer: SnapshotProducer,
        pipeline: Pipeline,
        health: Arc<HealthMonitor>,
        settings: ServiceSettings,
        clock: SharedClock,
    ) -> Result<Self> {
        if settings.backup_interval.is_zero() || settings.check_interval.is_zero() {
            return Err(BackupError::Config("backup and check intervals must be positive".into()));
        }

        let naming = producer.naming();
        std::fs::create_dir_all(naming.folder())?;
        info!(
            folder = %naming.folder().display(),
            prefix = naming.prefix(),
            stages = pipeline.stages().len(),
            checksum = settings.use_checksum,
            "Initializing backup service"
        );

        let marker = RetentionMarker::new(naming);
        Ok(Self {
            gate: ChecksumGate::new(settings.use_checksum, marker.clone()),
            marker,
            producer,
            pipeline,
            health,
            clock,
            backup_interval: settings.backup_interval,
            check_interval: settings.check_interval,
        })
    }

    /// Wire the service from a loaded configuration, sharing `health` with
    /// whoever serves it.
    pub fn from_config(config: &Config, health: Arc<HealthMonitor>) -> Result<Self> {
        let naming = config.naming();
        let pipeline = processors::build_pipeline(&config.processors, &naming)?;
        let producer = SnapshotProducer::new(&config.database.path, naming);
        Self::new(
            producer,
            pipeline,
            health,
            ServiceSettings {
                backup_interval: config.backup_interval(),
                check_interval: config.check_interval(),
                use_checksum: config.backup.use_checksum,
            },
        )
    }

    pub fn health(&self) -> Arc<HealthMonitor> {
        Arc::clone(&self.health)
    }

    /// When the next backup is due; `None` means right away.
    pub async fn next_due(&self) -> Option<DateTime<Utc>> {
        let last = self.marker.last_success().await?;
        let interval = chrono::Duration::from_std(self.backup_interval).unwrap_or(chrono::Duration::MAX);
        Some(last.checked_add_signed(interval).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    /// One due check, running a full cycle when a backup is due.
    pub async fn tick(&mut self, cancel: &CancellationToken) -> CycleOutcome {
        if let Some(next_due) = self.next_due().await {
            if self.clock.now() < next_due {
                debug!(next_due = %next_due, "Backup not due yet");
                return CycleOutcome::NotDue { next_due };
            }
        }
        self.run_cycle(cancel).await
    }

    /// Snapshot, gate and process unconditionally.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> CycleOutcome {
        let started = self.clock.now();

        let candidate = match self.producer.create(started, cancel).await {
            Ok(path) => path,
            Err(e) if e.is_cancelled() => return CycleOutcome::Cancelled,
            Err(e) => {
                error!(error = %e, "Backup failed");
                self.health.update(false, "Backup failed", Some(e.to_string()));
                return CycleOutcome::SnapshotFailed(e.to_string());
            }
        };

        let verdict = match self.gate.evaluate(&candidate, cancel).await {
            Ok(v) => v,
            Err(_) => {
                remove_candidate(&candidate).await;
                return CycleOutcome::Cancelled;
            }
        };

        match verdict {
            Verdict::Unchanged { digest } => {
                remove_candidate(&candidate).await;
                info!(
                    path = %candidate.display(),
                    "Backup file was deleted because is not different from last backup"
                );
                self.mark_success(started).await;
                self.health.update(true, "Backup skipped, database unchanged", None);
                CycleOutcome::Unchanged { digest }
            }
            Verdict::Changed { digest } => {
                if let Some(digest) = &digest {
                    if let Err(e) = self.gate.accept(digest).await {
                        warn!(
                            path = %self.marker.hash_file().display(),
                            error = %e,
                            "Failed to persist backup digest"
                        );
                    }
                }
                self.mark_success(started).await;
                self.process(candidate, cancel).await
            }
        }
    }

    async fn process(&mut self, snapshot: PathBuf, cancel: &CancellationToken) -> CycleOutcome {
        match self.pipeline.run(&snapshot, cancel).await {
            Ok(report) => {
                self.gate.record_pipeline_result(true);
                let error = (!report.warnings.is_empty()).then(|| {
                    report
                        .warnings
                        .iter()
                        .map(|(stage, w)| format!("{stage}: {w}"))
                        .collect::<Vec<_>>()
                        .join("; ")
                });
                let message = if report.warnings.is_empty() {
                    format!("Backup completed: {}", report.final_path.display())
                } else {
                    format!(
                        "Backup completed with {} warning(s): {}",
                        report.warnings.len(),
                        report.final_path.display()
                    )
                };
                info!(path = %report.final_path.display(), stages = report.stages_run, "Backup completed");
                self.health.update(true, message, error);
                CycleOutcome::Processed { snapshot, report }
            }
            Err(failure) => {
                self.gate.record_pipeline_result(false);
                if failure.source.is_cancelled() {
                    return CycleOutcome::Cancelled;
                }
                self.health.update(
                    false,
                    format!(
                        "Backup processor '{}' (priority {}) failed",
                        failure.stage, failure.priority
                    ),
                    Some(failure.source.to_string()),
                );
                CycleOutcome::PipelineFailed {
                    snapshot,
                    stage: failure.stage,
                    error: failure.source.to_string(),
                }
            }
        }
    }

    async fn mark_success(&self, at: DateTime<Utc>) {
        if let Err(e) = self.marker.set_last_success(at).await {
            warn!(error = %e, "Failed to persist last backup time");
        }
    }

    /// Run until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            backup_interval_secs = self.backup_interval.as_secs(),
            check_interval_secs = self.check_interval.as_secs(),
            "Backup service started"
        );

        while !cancel.is_cancelled() {
            if let CycleOutcome::Cancelled = self.tick(&cancel).await {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.check_interval) => {}
                _ = cancel.cancelled() => break,
            }
        }

        info!("Backup service stopped");
    }
}

async fn remove_candidate(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to delete backup candidate");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::health::{HealthStatus, HealthThresholds};
    use crate::pipeline::testing::RecordingStage;
    use crate::snapshot::naming::SnapshotNaming;
    use parking_lot::Mutex;
    use rusqlite::Connection;
    use std::path::Path;
    use tempfile::TempDir;

    const INTERVAL: Duration = Duration::from_secs(60);

    struct Fixture {
        dir: TempDir,
        db: PathBuf,
        clock: ManualClock,
        health: Arc<HealthMonitor>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let db = dir.path().join("app.db");
            let conn = Connection::open(&db).unwrap();
            conn.execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT); INSERT INTO items (name) VALUES ('a');")
                .unwrap();

            let clock = ManualClock::new(
                DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
                    .unwrap()
                    .with_timezone(&Utc),
            );
            let thresholds = HealthThresholds::resolve(None, None, INTERVAL).unwrap();
            let health = Arc::new(HealthMonitor::with_clock(thresholds, Duration::from_secs(1), clock.shared()));
            Self { dir, db, clock, health }
        }

        fn folder(&self) -> PathBuf {
            self.dir.path().join("backups")
        }

        fn service(&self, pipeline: Pipeline, use_checksum: bool) -> BackupService {
            let naming = SnapshotNaming::for_database(&self.db, Some(self.folder().as_path()), ".bak", false);
            BackupService::with_clock(
                SnapshotProducer::new(&self.db, naming),
                pipeline,
                Arc::clone(&self.health),
                ServiceSettings {
                    backup_interval: INTERVAL,
                    check_interval: Duration::from_secs(1),
                    use_checksum,
                },
                self.clock.shared(),
            )
            .unwrap()
        }

        fn write_row(&self, name: &str) {
            let conn = Connection::open(&self.db).unwrap();
            conn.execute("INSERT INTO items (name) VALUES (?1)", [name]).unwrap();
        }

        fn snapshots(&self) -> Vec<String> {
            let mut names: Vec<String> = std::fs::read_dir(self.folder())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .filter(|n| n.starts_with("app_"))
                .collect();
            names.sort();
            names
        }

        fn hash(&self) -> String {
            std::fs::read_to_string(self.folder().join("app.lastHash")).unwrap()
        }
    }

    #[tokio::test]
    async fn test_unchanged_candidate_is_deleted_and_digest_kept() {
        let fx = Fixture::new();
        let mut service = fx.service(Pipeline::default(), true);
        let cancel = CancellationToken::new();

        assert!(matches!(service.run_cycle(&cancel).await, CycleOutcome::Processed { .. }));
        let first_hash = fx.hash();

        fx.clock.advance(INTERVAL);
        let outcome = service.run_cycle(&cancel).await;

        assert!(matches!(outcome, CycleOutcome::Unchanged { ref digest } if *digest == first_hash));
        assert_eq!(fx.snapshots(), vec!["app_20240101000000.bak"]);
        assert_eq!(fx.hash(), first_hash);
        assert_eq!(service.next_due().await, Some(fx.clock.now() + chrono::Duration::seconds(60)));
    }

    #[tokio::test]
    async fn test_changed_content_is_kept_and_processed() {
        let fx = Fixture::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder().add(RecordingStage::new("upload", &log)).build();
        let mut service = fx.service(pipeline, true);
        let cancel = CancellationToken::new();

        service.run_cycle(&cancel).await;
        let first_hash = fx.hash();

        fx.write_row("b");
        fx.clock.advance(INTERVAL);
        let outcome = service.run_cycle(&cancel).await;

        assert!(matches!(outcome, CycleOutcome::Processed { .. }));
        assert_eq!(fx.snapshots(), vec!["app_20240101000000.bak", "app_20240101000100.bak"]);
        assert_ne!(fx.hash(), first_hash);
        assert_eq!(*log.lock(), vec!["upload", "upload"]);
        assert_eq!(fx.health.check().status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_stage_failure_is_reported_and_forces_next_cycle() {
        let fx = Fixture::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder()
            .add_with_priority(0, RecordingStage::new("compress", &log).renaming(".zst"))
            .add_with_priority(1, RecordingStage::new("upload", &log).failing())
            .add_with_priority(2, RecordingStage::new("retention", &log))
            .build();
        let mut service = fx.service(pipeline, true);
        let cancel = CancellationToken::new();

        let outcome = service.run_cycle(&cancel).await;

        match outcome {
            CycleOutcome::PipelineFailed { snapshot, stage, .. } => {
                assert_eq!(stage, "upload");
                let mut compressed = snapshot.into_os_string();
                compressed.push(".zst");
                assert!(Path::new(&compressed).exists());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(*log.lock(), vec!["compress", "upload"]);
        let report = fx.health.check();
        assert!(report.message.unwrap().contains("upload"));
        assert!(report.error.unwrap().contains("upload exploded"));

        // Same content, but the previous pipeline did not finish.
        fx.clock.advance(INTERVAL);
        let outcome = service.run_cycle(&cancel).await;
        assert!(matches!(outcome, CycleOutcome::PipelineFailed { .. }));
        assert_eq!(fx.snapshots().iter().filter(|n| n.ends_with(".bak")).count(), 2);
    }

    #[tokio::test]
    async fn test_restart_does_not_trigger_an_extra_backup() {
        let fx = Fixture::new();
        let cancel = CancellationToken::new();

        let mut first = fx.service(Pipeline::default(), true);
        assert!(matches!(first.tick(&cancel).await, CycleOutcome::Processed { .. }));
        drop(first);

        fx.clock.advance(Duration::from_secs(30));
        let mut restarted = fx.service(Pipeline::default(), true);
        assert!(matches!(restarted.tick(&cancel).await, CycleOutcome::NotDue { .. }));
        assert_eq!(fx.snapshots().len(), 1);

        fx.write_row("b");
        fx.clock.advance(Duration::from_secs(30));
        assert!(matches!(restarted.tick(&cancel).await, CycleOutcome::Processed { .. }));
        assert_eq!(fx.snapshots().len(), 2);
    }

    #[tokio::test]
    async fn test_restart_without_marker_uses_file_names() {
        let fx = Fixture::new();
        let cancel = CancellationToken::new();

        let mut first = fx.service(Pipeline::default(), true);
        first.run_cycle(&cancel).await;
        std::fs::remove_file(fx.folder().join("app.lastBackup")).unwrap();

        fx.clock.advance(Duration::from_secs(10));
        let mut restarted = fx.service(Pipeline::default(), true);
        assert!(matches!(restarted.tick(&cancel).await, CycleOutcome::NotDue { .. }));
    }

    #[tokio::test]
    async fn test_snapshot_failure_touches_no_marker() {
        let fx = Fixture::new();
        std::fs::remove_file(&fx.db).unwrap();
        let mut service = fx.service(Pipeline::default(), true);

        let outcome = service.run_cycle(&CancellationToken::new()).await;

        assert!(matches!(outcome, CycleOutcome::SnapshotFailed(_)));
        assert!(!fx.folder().join("app.lastBackup").exists());
        assert!(!fx.folder().join("app.lastHash").exists());
        assert!(fx.snapshots().is_empty());
        assert_eq!(fx.health.check().status, HealthStatus::Unhealthy);
        assert_eq!(service.next_due().await, None);
    }

    #[tokio::test]
    async fn test_disabled_checksum_processes_every_cycle() {
        let fx = Fixture::new();
        let mut service = fx.service(Pipeline::default(), false);
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            assert!(matches!(service.run_cycle(&cancel).await, CycleOutcome::Processed { .. }));
            fx.clock.advance(INTERVAL);
        }
        assert_eq!(fx.snapshots().len(), 3);
        assert!(!fx.folder().join("app.lastHash").exists());
    }

    #[tokio::test]
    async fn test_run_exits_promptly_on_cancel() {
        let fx = Fixture::new();
        let service = fx.service(Pipeline::default(), true);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(service.run(cancel.clone()));
        for _ in 0..100 {
            if !fx.snapshots().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("service did not stop")
            .unwrap();
        assert_eq!(fx.snapshots().len(), 1);
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let fx = Fixture::new();
        let naming = SnapshotNaming::for_database(&fx.db, None, ".bak", false);
        let result = BackupService::new(
            SnapshotProducer::new(&fx.db, naming),
            Pipeline::default(),
            Arc::clone(&fx.health),
            ServiceSettings {
                backup_interval: Duration::ZERO,
                check_interval: Duration::from_secs(1),
                use_checksum: true,
            },
        );
        assert!(matches!(result, Err(BackupError::Config(_))));
    }
}
