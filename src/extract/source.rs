//! Single-pass entry sources over the supported archive containers.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use tar::EntryType;
use zip::ZipArchive;

use crate::extract::ExtractionError;
use crate::inspect::ArchiveKind;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    /// Container bookkeeping (pax global headers) with no content of its own.
    Metadata,
    /// Links, devices, fifos. Never materialised.
    Other(&'static str),
}

#[derive(Debug, Clone)]
pub struct EntryHeader {
    /// Name as declared by the archive. Untrusted.
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
}

pub type EntryVisitor<'a> =
    dyn FnMut(EntryHeader, &mut dyn Read) -> Result<(), ExtractionError> + 'a;

/// Sequential view of an archive's entries.
///
/// Entries are visited once, in archive order. Iterating again requires
/// opening the archive again.
pub trait EntrySource {
    /// Number of entries when the container records it up front.
    fn entry_count_hint(&self) -> Option<usize> {
        None
    }

    /// Hand each entry to `visit`. The first error from the archive or from
    /// `visit` stops iteration and is returned.
    fn for_each_entry(&mut self, visit: &mut EntryVisitor<'_>) -> Result<(), ExtractionError>;
}

pub fn open_source(path: &Path, kind: ArchiveKind) -> Result<Box<dyn EntrySource>, ExtractionError> {
    let file = File::open(path).map_err(|source| ExtractionError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);
    let source: Box<dyn EntrySource> = match kind {
        ArchiveKind::Zip => Box::new(ZipSource {
            archive: ZipArchive::new(reader)?,
        }),
        ArchiveKind::Tar => Box::new(TarSource {
            archive: tar::Archive::new(reader),
        }),
        ArchiveKind::TarGz => Box::new(TarSource {
            archive: tar::Archive::new(GzDecoder::new(reader)),
        }),
    };
    Ok(source)
}

struct ZipSource {
    archive: ZipArchive<BufReader<File>>,
}

impl EntrySource for ZipSource {
    fn entry_count_hint(&self) -> Option<usize> {
        Some(self.archive.len())
    }

    fn for_each_entry(&mut self, visit: &mut EntryVisitor<'_>) -> Result<(), ExtractionError> {
        for index in 0..self.archive.len() {
            let mut file = self.archive.by_index(index)?;
            let is_symlink = file
                .unix_mode()
                .is_some_and(|mode| mode & S_IFMT == S_IFLNK);
            let kind = if file.is_dir() {
                EntryKind::Directory
            } else if is_symlink {
                EntryKind::Other("symlink")
            } else {
                EntryKind::File
            };
            let header = EntryHeader {
                name: file.name().to_string(),
                kind,
                size: file.size(),
            };
            visit(header, &mut file)?;
        }
        Ok(())
    }
}

struct TarSource<R: Read> {
    archive: tar::Archive<R>,
}

impl<R: Read> EntrySource for TarSource<R> {
    fn for_each_entry(&mut self, visit: &mut EntryVisitor<'_>) -> Result<(), ExtractionError> {
        for entry in self.archive.entries()? {
            let mut entry = entry?;
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let header = EntryHeader {
                name,
                kind: tar_entry_kind(entry.header().entry_type()),
                size: entry.size(),
            };
            visit(header, &mut entry)?;
        }
        Ok(())
    }
}

fn tar_entry_kind(entry_type: EntryType) -> EntryKind {
    if entry_type.is_dir() {
        EntryKind::Directory
    } else if entry_type.is_file() || entry_type == EntryType::Continuous {
        EntryKind::File
    } else if entry_type.is_pax_global_extensions() || entry_type.is_pax_local_extensions() {
        EntryKind::Metadata
    } else if entry_type.is_symlink() {
        EntryKind::Other("symlink")
    } else if entry_type.is_hard_link() {
        EntryKind::Other("hard link")
    } else if entry_type.is_character_special() || entry_type.is_block_special() {
        EntryKind::Other("device")
    } else if entry_type.is_fifo() {
        EntryKind::Other("fifo")
    } else {
        EntryKind::Other("unsupported")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_tar_entry_types() {
        assert_eq!(tar_entry_kind(EntryType::Regular), EntryKind::File);
        assert_eq!(tar_entry_kind(EntryType::Continuous), EntryKind::File);
        assert_eq!(tar_entry_kind(EntryType::Directory), EntryKind::Directory);
        assert_eq!(tar_entry_kind(EntryType::Symlink), EntryKind::Other("symlink"));
        assert_eq!(tar_entry_kind(EntryType::Link), EntryKind::Other("hard link"));
        assert_eq!(tar_entry_kind(EntryType::Fifo), EntryKind::Other("fifo"));
        assert_eq!(
            tar_entry_kind(EntryType::XGlobalHeader),
            EntryKind::Metadata
        );
    }

    #[test]
    fn zip_source_reports_entry_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("two.zip");
        let mut writer = zip::ZipWriter::new(File::create(&path).expect("create"));
        let options = zip::write::FileOptions::default();
        writer.add_directory("d/", options).expect("dir");
        writer.start_file("d/x", options).expect("file");
        std::io::Write::write_all(&mut writer, b"x").expect("write");
        writer.finish().expect("finish");

        let mut source = open_source(&path, ArchiveKind::Zip).expect("open");
        assert_eq!(source.entry_count_hint(), Some(2));

        let mut seen = Vec::new();
        source
            .for_each_entry(&mut |header: EntryHeader, _reader: &mut dyn Read| {
                seen.push((header.name, header.kind));
                Ok(())
            })
            .expect("iterate");
        assert_eq!(
            seen,
            vec![
                ("d/".to_string(), EntryKind::Directory),
                ("d/x".to_string(), EntryKind::File),
            ]
        );
    }
}
