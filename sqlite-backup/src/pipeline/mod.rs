//! Ordered chain of post-processing stages run over each accepted snapshot.
//!
//! Stages run strictly in ascending priority (ties keep registration order).
//! Each stage receives the path returned by the previous one. The first stage
//! that returns an error aborts the rest of the chain; whatever earlier stages
//! left on disk stays there.

use crate::utils::errors::{BackupError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a stage hands to the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutput {
    pub path: PathBuf,
    /// Set when the stage hit a recoverable problem and chose to carry on.
    pub warning: Option<String>,
}

impl StageOutput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            warning: None,
        }
    }

    pub fn with_warning(path: impl Into<PathBuf>, warning: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            warning: Some(warning.into()),
        }
    }
}

/// A single pipeline stage.
///
/// Returning `Err` aborts the chain for this cycle. A stage that wants to
/// log-and-continue returns `Ok` with a warning instead.
#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, path: &Path, cancel: &CancellationToken) -> Result<StageOutput>;
}

#[derive(Clone)]
pub struct ProcessorDescriptor {
    pub priority: i32,
    pub processor: Arc<dyn Processor>,
}

impl std::fmt::Debug for ProcessorDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorDescriptor")
            .field("priority", &self.priority)
            .field("processor", &self.processor.name())
            .finish()
    }
}

#[derive(Debug, Error)]
#[error("Stage '{stage}' (priority {priority}) failed: {source}")]
pub struct StageFailure {
    pub stage: String,
    pub priority: i32,
    #[source]
    pub source: BackupError,
}

/// Outcome of a fully completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub final_path: PathBuf,
    pub stages_run: usize,
    /// `(stage, warning)` for stages that carried on after an issue.
    pub warnings: Vec<(String, String)>,
}

/// Builds a [`Pipeline`] once at startup.
///
/// `add` assigns the next free priority slot; `add_with_priority` pins one.
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<ProcessorDescriptor>,
    next_priority: i32,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Priority that `add` would assign next.
    pub fn next_priority(&self) -> i32 {
        self.next_priority
    }

    pub fn add(self, processor: impl Processor + 'static) -> Self {
        let priority = self.next_priority;
        self.add_with_priority(priority, processor)
    }

    pub fn add_with_priority(self, priority: i32, processor: impl Processor + 'static) -> Self {
        self.add_shared(priority, Arc::new(processor))
    }

    pub fn add_shared(mut self, priority: i32, processor: Arc<dyn Processor>) -> Self {
        self.stages.push(ProcessorDescriptor { priority, processor });
        self.next_priority = self.next_priority.max(priority.saturating_add(1));
        self
    }

    pub fn build(mut self) -> Pipeline {
        // Stable sort keeps registration order for equal priorities.
        self.stages.sort_by_key(|d| d.priority);
        Pipeline {
            stages: Arc::new(self.stages),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    stages: Arc<Vec<ProcessorDescriptor>>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn stages(&self) -> &[ProcessorDescriptor] {
        &self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub async fn run(
        &self,
        snapshot: &Path,
        cancel: &CancellationToken,
    ) -> std::result::Result<PipelineReport, StageFailure> {
        let mut path = snapshot.to_path_buf();
        let mut warnings = Vec::new();

        for (index, stage) in self.stages.iter().enumerate() {
            let name = stage.processor.name();

            if cancel.is_cancelled() {
                info!(stage = name, "Pipeline cancelled before stage");
                return Err(StageFailure {
                    stage: name.to_string(),
                    priority: stage.priority,
                    source: BackupError::Cancelled,
                });
            }

            debug!(stage = name, priority = stage.priority, path = %path.display(), "Running stage");
            match stage.processor.process(&path, cancel).await {
                Ok(output) => {
                    if let Some(warning) = output.warning {
                        warn!(stage = name, warning = %warning, "Stage completed with a warning");
                        warnings.push((name.to_string(), warning));
                    }
                    path = output.path;
                }
                Err(e) => {
                    error!(
                        stage = name,
                        priority = stage.priority,
                        error = %e,
                        skipped = self.stages.len() - index - 1,
                        "Backup processor didn't complete successfully, subsequent processors are skipped"
                    );
                    return Err(StageFailure {
                        stage: name.to_string(),
                        priority: stage.priority,
                        source: e,
                    });
                }
            }
        }

        Ok(PipelineReport {
            final_path: path,
            stages_run: self.stages.len(),
            warnings,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Records its invocation and optionally fails or renames the file.
    pub struct RecordingStage {
        pub name: String,
        pub log: Arc<Mutex<Vec<String>>>,
        pub fail: bool,
        pub suffix: Option<String>,
        pub warning: Option<String>,
    }

    impl RecordingStage {
        pub fn new(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                log: Arc::clone(log),
                fail: false,
                suffix: None,
                warning: None,
            }
        }

        pub fn failing(mut self) -> Self {
            self.fail = true;
            self
        }

        pub fn renaming(mut self, suffix: &str) -> Self {
            self.suffix = Some(suffix.to_string());
            self
        }

        pub fn warning(mut self, warning: &str) -> Self {
            self.warning = Some(warning.to_string());
            self
        }
    }

    #[async_trait]
    impl Processor for RecordingStage {
        fn name(&self) -> &str {
            &self.name
        }

        async fn process(&self, path: &Path, _cancel: &CancellationToken) -> Result<StageOutput> {
            self.log.lock().push(self.name.clone());
            if self.fail {
                return Err(BackupError::Io(std::io::Error::other(format!("{} exploded", self.name))));
            }

            let mut next = path.to_path_buf();
            if let Some(suffix) = &self.suffix {
                let mut renamed = path.as_os_str().to_owned();
                renamed.push(suffix);
                next = PathBuf::from(renamed);
                std::fs::write(&next, b"derived")?;
            }

            Ok(match &self.warning {
                Some(w) => StageOutput::with_warning(next, w.clone()),
                None => StageOutput::new(next),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingStage;
    use super::*;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_runs_in_ascending_priority() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder()
            .add_with_priority(2, RecordingStage::new("p2", &log))
            .add_with_priority(0, RecordingStage::new("p0", &log))
            .add_with_priority(1, RecordingStage::new("p1", &log))
            .build();

        pipeline.run(Path::new("snap.bak"), &CancellationToken::new()).await.unwrap();

        assert_eq!(*log.lock(), vec!["p0", "p1", "p2"]);
    }

    #[tokio::test]
    async fn test_equal_priorities_keep_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder()
            .add_with_priority(1, RecordingStage::new("first", &log))
            .add_with_priority(0, RecordingStage::new("zero", &log))
            .add_with_priority(1, RecordingStage::new("second", &log))
            .build();

        pipeline.run(Path::new("snap.bak"), &CancellationToken::new()).await.unwrap();

        assert_eq!(*log.lock(), vec!["zero", "first", "second"]);
    }

    #[test]
    fn test_add_assigns_next_slot() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder()
            .add(RecordingStage::new("a", &log))
            .add_with_priority(5, RecordingStage::new("b", &log))
            .add(RecordingStage::new("c", &log))
            .build();

        let priorities: Vec<i32> = pipeline.stages().iter().map(|d| d.priority).collect();
        assert_eq!(priorities, vec![0, 5, 6]);
    }

    #[tokio::test]
    async fn test_output_path_chains_into_next_stage() {
        let dir = TempDir::new().unwrap();
        let snapshot = dir.path().join("snap.bak");
        std::fs::write(&snapshot, b"db").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let pipeline = Pipeline::builder()
            .add(RecordingStage::new("compress", &log).renaming(".zst"))
            .add(RecordingStage::new("upload", &log).renaming(".sent"))
            .build();

        let report = pipeline.run(&snapshot, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.final_path, dir.path().join("snap.bak.zst.sent"));
        assert_eq!(report.stages_run, 2);
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_stages() {
        let dir = TempDir::new().unwrap();
        let snapshot = dir.path().join("snap.bak");
        std::fs::write(&snapshot, b"db").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let pipeline = Pipeline::builder()
            .add_with_priority(0, RecordingStage::new("compress", &log).renaming(".zst"))
            .add_with_priority(1, RecordingStage::new("upload", &log).failing())
            .add_with_priority(2, RecordingStage::new("retention", &log))
            .build();

        let failure = pipeline.run(&snapshot, &CancellationToken::new()).await.unwrap_err();

        assert_eq!(failure.stage, "upload");
        assert_eq!(failure.priority, 1);
        assert_eq!(*log.lock(), vec!["compress", "upload"]);
        assert!(dir.path().join("snap.bak.zst").exists());
    }

    #[tokio::test]
    async fn test_warnings_do_not_abort() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder()
            .add(RecordingStage::new("upload", &log).warning("server returned 502"))
            .add(RecordingStage::new("retention", &log))
            .build();

        let report = pipeline.run(Path::new("snap.bak"), &CancellationToken::new()).await.unwrap();

        assert_eq!(report.warnings, vec![("upload".to_string(), "server returned 502".to_string())]);
        assert_eq!(*log.lock(), vec!["upload", "retention"]);
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_stage() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder().add(RecordingStage::new("only", &log)).build();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let failure = pipeline.run(Path::new("snap.bak"), &cancel).await.unwrap_err();

        assert!(failure.source.is_cancelled());
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_empty_pipeline_returns_snapshot_path() {
        let report = Pipeline::default()
            .run(Path::new("snap.bak"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.final_path, PathBuf::from("snap.bak"));
        assert_eq!(report.stages_run, 0);
    }
}
