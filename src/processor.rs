//! # Processor
//!
//! Host-facing archive data-source processor. It is exposed through two
//! narrow capabilities: [`DataSourceProcessor`] for interactive use driven
//! by a configuration panel, and [`AutoIngestProcessor`] for unattended use
//! with explicit parameters. Both share [`Detectable`].

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::LoadedConfig;
use crate::inspect::ArchiveInspector;
use crate::panel::ConfigPanel;
use crate::runner::{RunHandle, RunnerError, TaskRunner};
use crate::task::{IngestCallback, IngestTask, ProgressMonitor, RunRequest, TaskSettings};

pub const DATA_SOURCE_TYPE: &str = "Archive file";

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("configuration is not valid: {0}")]
    ConfigurationInvalid(String),
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

pub trait Detectable {
    fn data_source_type(&self) -> &str;

    /// Confidence in `[0, 100]` that this processor can handle `path`.
    fn can_process(&self, path: &Path) -> u8;
}

/// Interactive capability: configure through a panel, then run.
pub trait DataSourceProcessor: Detectable {
    type Panel: ConfigPanel;

    /// Prepare and return the configuration panel.
    fn configure(&mut self) -> &mut Self::Panel;
    fn validate(&self) -> bool;
    fn run_configured(
        &mut self,
        monitor: Arc<dyn ProgressMonitor>,
        callback: IngestCallback,
    ) -> Result<RunHandle, ProcessorError>;
    fn cancel(&self);
    fn reset(&mut self);
}

/// Unattended capability: run with caller-supplied parameters.
pub trait AutoIngestProcessor: Detectable + Send {
    fn process(
        &self,
        device_id: &str,
        path: &Path,
        monitor: Arc<dyn ProgressMonitor>,
        callback: IngestCallback,
    ) -> Result<RunHandle, ProcessorError>;
}

pub struct ArchiveDsProcessor<P: ConfigPanel> {
    panel: P,
    inspector: ArchiveInspector,
    settings: Arc<TaskSettings>,
    runner: TaskRunner,
    pending: Option<RunRequest>,
}

impl<P: ConfigPanel + std::fmt::Debug> std::fmt::Debug for ArchiveDsProcessor<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveDsProcessor")
            .field("panel", &self.panel)
            .field("settings", &self.settings)
            .field("runner", &self.runner)
            .field("pending", &self.pending)
            .finish()
    }
}

impl<P: ConfigPanel> ArchiveDsProcessor<P> {
    pub fn new(panel: P, settings: TaskSettings, thread_name: &str) -> std::io::Result<Self> {
        Ok(Self {
            panel,
            inspector: ArchiveInspector::new(),
            settings: Arc::new(settings),
            runner: TaskRunner::new(thread_name)?,
            pending: None,
        })
    }

    pub fn from_config(panel: P, loaded: &LoadedConfig) -> std::io::Result<Self> {
        let settings = TaskSettings::from_config(&loaded.config, &loaded.config_hash);
        Self::new(panel, settings, &loaded.config.thread_name)
    }

    pub fn detect(&self, path: &Path) -> u8 {
        self.inspector.score(path)
    }

    /// Request built from the panel for the current configuration cycle.
    pub fn pending_request(&self) -> Option<&RunRequest> {
        self.pending.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.runner.is_busy()
    }

    /// Submit a run with explicit parameters. Returns as soon as the task
    /// is queued; the outcome arrives through `callback`.
    pub fn run(
        &self,
        request: RunRequest,
        monitor: Arc<dyn ProgressMonitor>,
        callback: IngestCallback,
    ) -> Result<RunHandle, ProcessorError> {
        info!(
            "submitting {} (device {})",
            request.archive_path.display(),
            request.device_id
        );
        let task = IngestTask::new(request, Arc::clone(&self.settings), monitor, callback);
        self.runner.submit(task).map_err(|err| {
            warn!("submission refused: {err}");
            ProcessorError::from(err)
        })
    }

    /// Best-effort cancellation of the in-flight run. Returns whether a run
    /// was signalled.
    pub fn cancel_run(&self) -> bool {
        self.runner.cancel()
    }

    fn request_from_panel(&mut self) -> Result<RunRequest, ProcessorError> {
        if let Some(request) = &self.pending {
            return Ok(request.clone());
        }
        if !self.panel.validate_panel() {
            return Err(ProcessorError::ConfigurationInvalid(
                "no readable archive selected".to_string(),
            ));
        }
        let path = self.panel.content_path().ok_or_else(|| {
            ProcessorError::ConfigurationInvalid("panel returned no content path".to_string())
        })?;
        self.panel.store_settings();
        let request = RunRequest::with_generated_device_id(path);
        self.pending = Some(request.clone());
        Ok(request)
    }
}

impl<P: ConfigPanel> Detectable for ArchiveDsProcessor<P> {
    fn data_source_type(&self) -> &str {
        DATA_SOURCE_TYPE
    }

    fn can_process(&self, path: &Path) -> u8 {
        self.detect(path)
    }
}

impl<P: ConfigPanel> DataSourceProcessor for ArchiveDsProcessor<P> {
    type Panel = P;

    fn configure(&mut self) -> &mut P {
        self.panel.read_settings();
        self.panel.select();
        &mut self.panel
    }

    fn validate(&self) -> bool {
        self.panel.validate_panel()
    }

    fn run_configured(
        &mut self,
        monitor: Arc<dyn ProgressMonitor>,
        callback: IngestCallback,
    ) -> Result<RunHandle, ProcessorError> {
        let request = self.request_from_panel()?;
        self.run(request, monitor, callback)
    }

    fn cancel(&self) {
        self.cancel_run();
    }

    fn reset(&mut self) {
        self.pending = None;
        self.panel.reset();
        self.runner.reset();
    }
}

impl<P: ConfigPanel> AutoIngestProcessor for ArchiveDsProcessor<P> {
    fn process(
        &self,
        device_id: &str,
        path: &Path,
        monitor: Arc<dyn ProgressMonitor>,
        callback: IngestCallback,
    ) -> Result<RunHandle, ProcessorError> {
        self.run(RunRequest::new(device_id, path), monitor, callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::PathPanel;
    use crate::task::{IngestResult, NullProgress};
    use std::io::Write;
    use std::path::PathBuf;
    use crossbeam_channel::{Receiver, unbounded};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(10);

    fn processor(root: &Path, panel: PathPanel) -> ArchiveDsProcessor<PathPanel> {
        let settings = TaskSettings {
            output_root: root.join("out"),
            copy_buffer: 64,
            write_manifest: false,
            config_hash: String::new(),
        };
        ArchiveDsProcessor::new(panel, settings, "proc-test").expect("processor")
    }

    fn write_zip(path: &Path) {
        let mut writer = zip::ZipWriter::new(std::fs::File::create(path).expect("create"));
        writer
            .start_file("a.txt", zip::write::FileOptions::default())
            .expect("start");
        writer.write_all(b"hello").expect("write");
        writer.finish().expect("finish");
    }

    fn callback() -> (IngestCallback, Receiver<IngestResult>) {
        let (tx, rx) = unbounded();
        (
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
            rx,
        )
    }

    #[test]
    fn detects_through_both_capabilities() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("a.zip");
        write_zip(&archive);
        let text = dir.path().join("notes.txt");
        std::fs::write(&text, b"notes").expect("write");

        let proc = processor(dir.path(), PathPanel::new());
        assert_eq!(proc.data_source_type(), "Archive file");
        assert_eq!(proc.can_process(&archive), 100);
        assert_eq!(proc.can_process(&text), 0);
        assert_eq!(proc.can_process(&dir.path().join("missing")), 0);
    }

    #[test]
    fn configured_request_is_built_once_per_cycle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("a.zip");
        write_zip(&archive);
        let mut proc = processor(dir.path(), PathPanel::with_path(&archive));
        assert!(proc.validate());

        let (cb, rx) = callback();
        proc.run_configured(Arc::new(NullProgress), cb).expect("first run");
        let first = proc.pending_request().cloned().expect("pending");
        assert_eq!(first.archive_path, archive);
        assert!(rx.recv_timeout(WAIT).expect("result").is_success());
        assert_eq!(proc.configure().stored_path(), Some(archive.as_path()));

        proc.configure().set_path(dir.path().join("other.zip"));
        let (cb, rx) = callback();
        proc.run_configured(Arc::new(NullProgress), cb).expect("second run");
        assert_eq!(proc.pending_request(), Some(&first));
        let result = rx.recv_timeout(WAIT).expect("result");
        assert_eq!(result.data_sources[0].device_id, first.device_id);

        proc.reset();
        assert!(proc.pending_request().is_none());
        assert!(!proc.validate());
    }

    #[test]
    fn unconfigured_run_is_invalid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut proc = processor(dir.path(), PathPanel::new());
        let (cb, _rx) = callback();
        let err = proc
            .run_configured(Arc::new(NullProgress), cb)
            .expect_err("invalid");
        assert!(matches!(err, ProcessorError::ConfigurationInvalid(_)));
        assert!(!proc.is_running());
    }

    #[test]
    fn auto_ingest_process_uses_explicit_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("a.zip");
        write_zip(&archive);
        let proc = processor(dir.path(), PathPanel::new());

        let (cb, rx) = callback();
        proc.process("device-42", &archive, Arc::new(NullProgress), cb)
            .expect("process");
        let result = rx.recv_timeout(WAIT).expect("result");
        assert!(result.is_success());
        assert_eq!(result.data_sources[0].device_id, "device-42");
        assert!(proc.pending_request().is_none());
    }

    #[test]
    fn cancel_without_run_is_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("a.zip");
        write_zip(&archive);
        let proc = processor(dir.path(), PathPanel::new());
        DataSourceProcessor::cancel(&proc);
        assert!(!proc.cancel_run());

        let (cb, rx) = callback();
        proc.run(
            RunRequest::new("d", PathBuf::from(&archive)),
            Arc::new(NullProgress),
            cb,
        )
        .expect("run after no-op cancel");
        assert!(rx.recv_timeout(WAIT).expect("result").is_success());
    }
}
