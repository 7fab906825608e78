//! Archive data-source processor.
//!
//! Detects archive files by content, extracts them into a fresh per-run
//! working directory on a dedicated background lane, and reports the
//! extracted tree as a new data source through a callback.

pub mod cancel;
pub mod cli;
pub mod config;
pub mod extract;
pub mod inspect;
pub mod logging;
pub mod panel;
pub mod processor;
pub mod registry;
pub mod runner;
pub mod task;

pub use cancel::CancelToken;
pub use extract::{ArchiveExtractor, ExtractionError};
pub use inspect::{ArchiveInspector, ArchiveKind, DetectionError};
pub use processor::{
    ArchiveDsProcessor, AutoIngestProcessor, DataSourceProcessor, Detectable, ProcessorError,
};
pub use runner::{RunHandle, RunnerError, TaskRunner};
pub use task::{
    DataSourceDescriptor, IngestCallback, IngestResult, IngestTask, ProgressMonitor, RunRequest,
    RunStatus,
};
