//! # Extract Module
//!
//! Unpacks an archive into a fresh working directory under an output root.
//!
//! The working directory is named `<stem>_<timestamp>` and is created with a
//! non-recursive create, so two runs never share one. Entries are written in
//! archive order; every destination must stay inside the working directory
//! after both lexical resolution and symlink resolution of its parent.
//! Partial output is kept when extraction fails or is cancelled.

pub mod source;
mod stream;

use std::io::{ErrorKind, Read};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::inspect::{ArchiveInspector, ArchiveKind, DetectionError};

use source::{EntryHeader, EntryKind, open_source};
use stream::EntryWriter;

/// 512 KiB, the chunk size used for entry copies unless configured.
pub const DEFAULT_COPY_BUFFER: usize = 512 * 1024;

const TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H_%M_%S_%6f";
const MAX_DIR_ATTEMPTS: u32 = 1000;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("cannot open archive {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("not a supported archive: {0}")]
    Unsupported(PathBuf),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("entry {entry:?}: {source}")]
    Entry {
        entry: String,
        #[source]
        source: std::io::Error,
    },
    #[error("entry {0:?} resolves outside the working directory")]
    UnsafePath(String),
    #[error("extraction cancelled")]
    Cancelled,
}

/// One regular file written into the working directory.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractedFile {
    /// Path relative to the working directory, `/`-separated.
    pub relative_path: String,
    pub size: u64,
    pub md5: String,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub working_dir: PathBuf,
    pub kind: ArchiveKind,
    pub files: Vec<ExtractedFile>,
    pub directories: u64,
    pub warnings: Vec<String>,
}

impl Extraction {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    buffer_size: usize,
    inspector: ArchiveInspector,
}

impl Default for ArchiveExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_COPY_BUFFER)
    }
}

impl ArchiveExtractor {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            inspector: ArchiveInspector::new(),
        }
    }

    pub fn extract(
        &self,
        archive_path: &Path,
        output_root: &Path,
        cancel: &CancelToken,
    ) -> Result<Extraction, ExtractionError> {
        self.extract_with(archive_path, output_root, cancel, &mut |_| {})
    }

    /// Extract `archive_path`, calling `on_entry` with each entry's declared
    /// name before it is processed.
    pub fn extract_with(
        &self,
        archive_path: &Path,
        output_root: &Path,
        cancel: &CancelToken,
        on_entry: &mut dyn FnMut(&str),
    ) -> Result<Extraction, ExtractionError> {
        if cancel.is_cancelled() {
            return Err(ExtractionError::Cancelled);
        }

        let kind = match self.inspector.inspect(archive_path) {
            Ok(Some(kind)) => kind,
            Ok(None) | Err(DetectionError::NotAFile(_)) => {
                return Err(ExtractionError::Unsupported(archive_path.to_path_buf()));
            }
            Err(DetectionError::Io { path, source }) => {
                return Err(ExtractionError::Open { path, source });
            }
        };

        // Open before creating anything so an unreadable archive leaves no trace.
        let mut entries = open_source(archive_path, kind)?;
        let working_dir = create_working_dir(output_root, archive_path)?;
        let root = working_dir.canonicalize()?;
        info!(
            "extracting {} archive {} into {}",
            kind,
            archive_path.display(),
            working_dir.display()
        );
        if let Some(count) = entries.entry_count_hint() {
            debug!("archive declares {count} entries");
        }

        let mut extraction = Extraction {
            working_dir,
            kind,
            files: Vec::new(),
            directories: 0,
            warnings: Vec::new(),
        };
        let mut buf = vec![0u8; self.buffer_size];

        entries.for_each_entry(&mut |header: EntryHeader, reader: &mut dyn Read| {
            on_entry(&header.name);
            if cancel.is_cancelled() {
                return Err(ExtractionError::Cancelled);
            }

            let Some(relative) = sanitize_entry_name(&header.name)? else {
                // `./` names the working directory itself.
                if header.kind == EntryKind::Directory {
                    return Ok(());
                }
                warn!("skipping entry with empty name");
                extraction
                    .warnings
                    .push(format!("skipped entry with empty name {:?}", header.name));
                return Ok(());
            };
            let dest = root.join(&relative);

            match header.kind {
                EntryKind::Directory => {
                    std::fs::create_dir_all(&dest).map_err(entry_error(&header.name))?;
                    ensure_contained(&root, &dest, &header.name)?;
                    extraction.directories += 1;
                }
                EntryKind::File => {
                    let file = self.write_file(&root, &dest, &header, reader, &mut buf, cancel)?;
                    extraction.files.push(file);
                }
                EntryKind::Metadata => {}
                EntryKind::Other(label) => {
                    warn!("skipping {label} entry {:?}", header.name);
                    extraction
                        .warnings
                        .push(format!("skipped {label} entry {:?}", header.name));
                }
            }
            Ok(())
        })?;

        info!(
            "extracted {} files ({} bytes) and {} directories into {}",
            extraction.files.len(),
            extraction.total_bytes(),
            extraction.directories,
            extraction.working_dir.display()
        );
        Ok(extraction)
    }

    fn write_file(
        &self,
        root: &Path,
        dest: &Path,
        header: &EntryHeader,
        reader: &mut dyn Read,
        buf: &mut [u8],
        cancel: &CancelToken,
    ) -> Result<ExtractedFile, ExtractionError> {
        let name = header.name.as_str();
        let parent = dest.parent().unwrap_or(root);
        std::fs::create_dir_all(parent).map_err(entry_error(name))?;
        ensure_contained(root, parent, name)?;

        // Overwrite replaces the entry itself, never a link target.
        if let Ok(meta) = std::fs::symlink_metadata(dest) {
            if meta.file_type().is_symlink() {
                std::fs::remove_file(dest).map_err(entry_error(name))?;
            }
        }

        let file = std::fs::File::create(dest).map_err(entry_error(name))?;
        let mut writer = EntryWriter::new(file, self.buffer_size);
        writer.copy_from(reader, buf, cancel).map_err(|err| match err {
            ExtractionError::Io(source) => ExtractionError::Entry {
                entry: name.to_string(),
                source,
            },
            other => other,
        })?;
        let (size, md5, sha256) = writer.finish().map_err(entry_error(name))?;
        if size != header.size {
            debug!("entry {name:?} declared {} bytes, wrote {size}", header.size);
        }

        let relative_path = dest
            .strip_prefix(root)
            .unwrap_or(dest)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        Ok(ExtractedFile {
            relative_path,
            size,
            md5,
            sha256,
        })
    }
}

/// Name of the working directory for `archive_path` at `now`: the file
/// name without its last extension, then the timestamp.
pub fn working_dir_name(archive_path: &Path, now: DateTime<Local>) -> String {
    let stem = archive_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "archive".to_string());
    format!("{}_{}", stem, now.format(TIMESTAMP_FORMAT))
}

fn create_working_dir(output_root: &Path, archive_path: &Path) -> Result<PathBuf, ExtractionError> {
    std::fs::create_dir_all(output_root)?;
    let base = working_dir_name(archive_path, Local::now());
    for attempt in 0..MAX_DIR_ATTEMPTS {
        let candidate = if attempt == 0 {
            output_root.join(&base)
        } else {
            output_root.join(format!("{base}_{attempt}"))
        };
        match std::fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(std::io::Error::new(
        ErrorKind::AlreadyExists,
        format!("no free working directory name for {base}"),
    )
    .into())
}

/// Lexically resolve an entry name to a relative path.
///
/// Backslashes count as separators. `.` components are dropped; `..`,
/// absolute roots, and drive prefixes are rejected. Returns `None` when
/// nothing is left.
pub fn sanitize_entry_name(name: &str) -> Result<Option<PathBuf>, ExtractionError> {
    let normalized = name.replace('\\', "/");
    let mut clean = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ExtractionError::UnsafePath(name.to_string()));
            }
        }
    }
    if clean.as_os_str().is_empty() {
        Ok(None)
    } else {
        Ok(Some(clean))
    }
}

fn ensure_contained(root: &Path, path: &Path, name: &str) -> Result<(), ExtractionError> {
    let resolved = path.canonicalize().map_err(entry_error(name))?;
    if resolved.starts_with(root) {
        Ok(())
    } else {
        Err(ExtractionError::UnsafePath(name.to_string()))
    }
}

fn entry_error(name: &str) -> impl Fn(std::io::Error) -> ExtractionError + '_ {
    move |source| ExtractionError::Entry {
        entry: name.to_string(),
        source,
    }
}
