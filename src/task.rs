//! # Ingest Task
//!
//! One extraction-and-registration run. A task moves through
//! `Created → Running → {Completed, Failed, Cancelled}` exactly once and
//! hands its [`IngestResult`] to the caller's callback exactly once.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::extract::{ArchiveExtractor, ExtractedFile, Extraction, ExtractionError};
use crate::inspect::ArchiveKind;

const MANIFEST_SUFFIX: &str = "manifest.jsonl";

/// Receives coarse progress from the background lane.
pub trait ProgressMonitor: Send + Sync {
    fn set_indeterminate(&self, indeterminate: bool);
    fn set_progress_max(&self, max: u64);
    fn set_progress(&self, progress: u64);
    fn set_progress_text(&self, text: &str);
}

/// Discards all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressMonitor for NullProgress {
    fn set_indeterminate(&self, _indeterminate: bool) {}
    fn set_progress_max(&self, _max: u64) {}
    fn set_progress(&self, _progress: u64) {}
    fn set_progress_text(&self, _text: &str) {}
}

/// Forwards phase changes to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressMonitor for LogProgress {
    fn set_indeterminate(&self, _indeterminate: bool) {}

    fn set_progress_max(&self, max: u64) {
        info!("registering {max} extracted files");
    }

    fn set_progress(&self, _progress: u64) {}

    fn set_progress_text(&self, text: &str) {
        tracing::debug!("{text}");
    }
}

/// Invoked once with the terminal result of a run.
pub type IngestCallback = Box<dyn FnOnce(IngestResult) + Send + 'static>;

/// Immutable parameters of one run, fixed at submission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub device_id: String,
    pub archive_path: PathBuf,
}

impl RunRequest {
    pub fn new(device_id: impl Into<String>, archive_path: impl Into<PathBuf>) -> Self {
        Self {
            device_id: device_id.into(),
            archive_path: archive_path.into(),
        }
    }

    /// Request with a freshly generated v4 UUID as device id.
    pub fn with_generated_device_id(archive_path: impl Into<PathBuf>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), archive_path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

/// An extracted tree ready to be added to a case.
#[derive(Debug, Clone, Serialize)]
pub struct DataSourceDescriptor {
    pub device_id: String,
    pub name: String,
    pub archive_path: PathBuf,
    pub archive_kind: ArchiveKind,
    pub root: PathBuf,
    pub file_count: u64,
    pub total_bytes: u64,
    pub manifest: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    pub status: RunStatus,
    /// Non-empty only when `status` is `Completed`.
    pub data_sources: Vec<DataSourceDescriptor>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl IngestResult {
    fn completed(descriptor: DataSourceDescriptor, warnings: Vec<String>) -> Self {
        Self {
            status: RunStatus::Completed,
            data_sources: vec![descriptor],
            warnings,
            errors: Vec::new(),
        }
    }

    fn empty(status: RunStatus, warnings: Vec<String>, errors: Vec<String>) -> Self {
        Self {
            status,
            data_sources: Vec::new(),
            warnings,
            errors,
        }
    }

    pub(crate) fn failed(errors: Vec<String>) -> Self {
        Self::empty(RunStatus::Failed, Vec::new(), errors)
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Settings shared by every task a processor submits.
#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub output_root: PathBuf,
    pub copy_buffer: usize,
    pub write_manifest: bool,
    pub config_hash: String,
}

impl TaskSettings {
    pub fn from_config(cfg: &Config, config_hash: &str) -> Self {
        Self {
            output_root: cfg.output_root(),
            copy_buffer: cfg.copy_buffer_bytes(),
            write_manifest: cfg.write_manifest,
            config_hash: config_hash.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct ManifestRecord<'a> {
    #[serde(flatten)]
    file: &'a ExtractedFile,
    device_id: &'a str,
    archive_path: &'a Path,
    tool_version: &'a str,
    config_hash: &'a str,
}

pub struct IngestTask {
    request: RunRequest,
    settings: Arc<TaskSettings>,
    monitor: Arc<dyn ProgressMonitor>,
    callback: Option<IngestCallback>,
    state: TaskState,
}

impl std::fmt::Debug for IngestTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestTask")
            .field("request", &self.request)
            .field("settings", &self.settings)
            .field("monitor", &"<dyn ProgressMonitor>")
            .field("state", &self.state)
            .finish()
    }
}

impl IngestTask {
    pub fn new(
        request: RunRequest,
        settings: Arc<TaskSettings>,
        monitor: Arc<dyn ProgressMonitor>,
        callback: IngestCallback,
    ) -> Self {
        Self {
            request,
            settings,
            monitor,
            callback: Some(callback),
            state: TaskState::Created,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Execute and deliver in one step. Returns the terminal state.
    pub fn run(mut self, cancel: &CancelToken) -> TaskState {
        let result = self.execute(cancel);
        let state = self.state;
        self.deliver(result);
        state
    }

    /// Perform the run without delivering the result. Calling it on a task
    /// that already left `Created` returns a failed result and leaves the
    /// state untouched.
    pub fn execute(&mut self, cancel: &CancelToken) -> IngestResult {
        if self.state != TaskState::Created {
            warn!("ingest task executed twice; state is {:?}", self.state);
            return IngestResult::empty(
                RunStatus::Failed,
                Vec::new(),
                vec!["task already executed".to_string()],
            );
        }
        self.state = TaskState::Running;

        if cancel.is_cancelled() {
            return self.cancelled(Vec::new());
        }

        let archive_path = self.request.archive_path.clone();
        info!(
            "ingesting {} as device {}",
            archive_path.display(),
            self.request.device_id
        );
        self.monitor.set_indeterminate(true);
        self.monitor
            .set_progress_text(&format!("Extracting {}", archive_path.display()));

        let extractor = ArchiveExtractor::new(self.settings.copy_buffer);
        let monitor = Arc::clone(&self.monitor);
        let outcome = extractor.extract_with(
            &archive_path,
            &self.settings.output_root,
            cancel,
            &mut |name: &str| monitor.set_progress_text(&format!("Extracting {name}")),
        );
        let extraction = match outcome {
            Ok(extraction) => extraction,
            Err(ExtractionError::Cancelled) => return self.cancelled(Vec::new()),
            Err(err) => {
                error!("failed to extract {}: {err}", archive_path.display());
                return self.failed(Vec::new(), vec![err.to_string()]);
            }
        };

        if cancel.is_cancelled() {
            return self.cancelled(extraction.warnings);
        }

        match self.register(&extraction) {
            Ok(descriptor) => {
                self.state = TaskState::Completed;
                info!(
                    "data source {} ready at {}",
                    descriptor.name,
                    descriptor.root.display()
                );
                IngestResult::completed(descriptor, extraction.warnings)
            }
            Err(err) => {
                error!("failed to register {}: {err}", extraction.working_dir.display());
                self.failed(extraction.warnings, vec![err.to_string()])
            }
        }
    }

    /// Hand `result` to the callback. Only the first call has any effect.
    pub fn deliver(&mut self, result: IngestResult) {
        match self.callback.take() {
            Some(callback) => callback(result),
            None => warn!("ingest result already delivered; dropping duplicate"),
        }
    }

    fn register(&self, extraction: &Extraction) -> Result<DataSourceDescriptor, ManifestError> {
        self.monitor.set_indeterminate(false);
        self.monitor.set_progress_max(extraction.files.len() as u64);
        self.monitor.set_progress_text("Registering extracted files");

        let manifest = if self.settings.write_manifest {
            Some(self.write_manifest(extraction)?)
        } else {
            self.monitor.set_progress(extraction.files.len() as u64);
            None
        };

        let name = self
            .request
            .archive_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.request.archive_path.display().to_string());

        Ok(DataSourceDescriptor {
            device_id: self.request.device_id.clone(),
            name,
            archive_path: self.request.archive_path.clone(),
            archive_kind: extraction.kind,
            root: extraction.working_dir.clone(),
            file_count: extraction.files.len() as u64,
            total_bytes: extraction.total_bytes(),
            manifest,
        })
    }

    fn write_manifest(&self, extraction: &Extraction) -> Result<PathBuf, ManifestError> {
        let path = manifest_path(&extraction.working_dir);
        let mut writer = BufWriter::new(File::create(&path)?);
        for (idx, file) in extraction.files.iter().enumerate() {
            let record = ManifestRecord {
                file,
                device_id: &self.request.device_id,
                archive_path: &self.request.archive_path,
                tool_version: env!("CARGO_PKG_VERSION"),
                config_hash: &self.settings.config_hash,
            };
            serde_json::to_writer(&mut writer, &record)?;
            writer.write_all(b"\n")?;
            self.monitor.set_progress(idx as u64 + 1);
        }
        writer.flush()?;
        Ok(path)
    }

    fn cancelled(&mut self, warnings: Vec<String>) -> IngestResult {
        warn!(
            "ingest of {} cancelled; partial output is kept",
            self.request.archive_path.display()
        );
        self.state = TaskState::Cancelled;
        IngestResult::empty(RunStatus::Cancelled, warnings, Vec::new())
    }

    fn failed(&mut self, warnings: Vec<String>, errors: Vec<String>) -> IngestResult {
        self.state = TaskState::Failed;
        IngestResult::empty(RunStatus::Failed, warnings, errors)
    }
}

/// `<output_root>/<working dir name>.manifest.jsonl`, next to the tree it
/// describes.
pub fn manifest_path(working_dir: &Path) -> PathBuf {
    let name = working_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    working_dir.with_file_name(format!("{name}.{MANIFEST_SUFFIX}"))
}
