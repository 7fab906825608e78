//! Archive detection by content signature.
//!
//! Detection never trusts the file name: a `.zip` full of text scores 0 and
//! an extension-less ZIP scores 100. Only the first two tar blocks of the
//! file, and for gzip the first two decompressed blocks, are read.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Score returned for a supported archive.
pub const HIGH_CONFIDENCE: u8 = 100;
/// Score returned for anything else, including unreadable paths.
pub const NO_CONFIDENCE: u8 = 0;

pub(crate) const TAR_BLOCK_SIZE: usize = 512;
const TAR_END_MARKER: usize = 2 * TAR_BLOCK_SIZE;
const TAR_USTAR_OFFSET: usize = 257;
const TAR_USTAR_MAGIC: &[u8; 5] = b"ustar";
const TAR_CHKSUM_RANGE: std::ops::Range<usize> = 148..156;

const ZIP_LOCAL_HEADER: &[u8; 4] = b"PK\x03\x04";
const ZIP_EMPTY_EOCD: &[u8; 4] = b"PK\x05\x06";
const GZIP_MAGIC: [u8; 3] = [0x1F, 0x8B, 0x08];

/// Supported archive container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::Tar => "tar",
            ArchiveKind::TarGz => "tar.gz",
        }
    }
}

impl std::fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("io error probing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("not a regular file: {0}")]
    NotAFile(PathBuf),
}

/// Stateless archive probe. Safe to share across threads.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchiveInspector;

impl ArchiveInspector {
    pub fn new() -> Self {
        Self
    }

    /// Confidence in `[0, 100]` that `path` is an archive this crate can
    /// extract. Probe failures degrade to [`NO_CONFIDENCE`].
    pub fn score(&self, path: &Path) -> u8 {
        match self.inspect(path) {
            Ok(Some(_)) => HIGH_CONFIDENCE,
            Ok(None) => NO_CONFIDENCE,
            Err(err) => {
                debug!("archive probe failed: {err}");
                NO_CONFIDENCE
            }
        }
    }

    /// Identify the archive kind of `path`, if any.
    pub fn inspect(&self, path: &Path) -> Result<Option<ArchiveKind>, DetectionError> {
        let io_err = |source| DetectionError::Io {
            path: path.to_path_buf(),
            source,
        };

        let metadata = std::fs::metadata(path).map_err(io_err)?;
        if !metadata.is_file() {
            return Err(DetectionError::NotAFile(path.to_path_buf()));
        }

        let mut file = File::open(path).map_err(io_err)?;
        let mut header = [0u8; TAR_END_MARKER];
        let n = read_full(&mut file, &mut header).map_err(io_err)?;
        let header = &header[..n];

        if is_zip_magic(header) {
            return Ok(Some(ArchiveKind::Zip));
        }
        if is_gzip_magic(header) {
            file.seek(SeekFrom::Start(0)).map_err(io_err)?;
            return Ok(sniff_gzip_payload(file).then_some(ArchiveKind::TarGz));
        }
        if is_tar_header(&header[..n.min(TAR_BLOCK_SIZE)]) {
            return Ok(Some(ArchiveKind::Tar));
        }
        let len = metadata.len();
        if len % TAR_BLOCK_SIZE as u64 == 0 && is_empty_tar(header) {
            return Ok(Some(ArchiveKind::Tar));
        }
        Ok(None)
    }
}

pub(crate) fn is_zip_magic(header: &[u8]) -> bool {
    header.len() >= 4
        && (header[..4] == *ZIP_LOCAL_HEADER || header[..4] == *ZIP_EMPTY_EOCD)
}

pub(crate) fn is_gzip_magic(header: &[u8]) -> bool {
    header.len() >= GZIP_MAGIC.len() && header[..GZIP_MAGIC.len()] == GZIP_MAGIC
}

/// A tar header block: full length, not all zeros, and a checksum that
/// matches. `ustar` magic is accepted but not required so v7 archives
/// still qualify.
pub(crate) fn is_tar_header(block: &[u8]) -> bool {
    if block.len() < TAR_BLOCK_SIZE || block.iter().all(|b| *b == 0) {
        return false;
    }
    let has_magic =
        block[TAR_USTAR_OFFSET..TAR_USTAR_OFFSET + TAR_USTAR_MAGIC.len()] == *TAR_USTAR_MAGIC;
    let checksum_ok = validate_checksum(block).unwrap_or(false);
    if has_magic && !checksum_ok {
        debug!("ustar magic present but header checksum mismatched");
    }
    checksum_ok
}

/// An archive with no entries: just the two zero blocks that end a tar
/// stream.
fn is_empty_tar(blocks: &[u8]) -> bool {
    blocks.len() == TAR_END_MARKER && blocks.iter().all(|b| *b == 0)
}

fn sniff_gzip_payload(file: File) -> bool {
    let mut decoder = GzDecoder::new(file);
    let mut blocks = [0u8; TAR_END_MARKER];
    match read_full(&mut decoder, &mut blocks) {
        Ok(n) => {
            is_tar_header(&blocks[..n.min(TAR_BLOCK_SIZE)]) || is_empty_tar(&blocks[..n])
        }
        Err(err) => {
            debug!("gzip payload unreadable: {err}");
            false
        }
    }
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

fn parse_octal(field: &[u8]) -> Option<u64> {
    let mut value = 0u64;
    let mut seen = false;
    for &b in field {
        if b == 0 || b == b' ' {
            if seen {
                break;
            }
            continue;
        }
        if !(b'0'..=b'7').contains(&b) {
            return None;
        }
        seen = true;
        value = value.saturating_mul(8).saturating_add((b - b'0') as u64);
    }
    seen.then_some(value)
}

fn validate_checksum(header: &[u8]) -> Option<bool> {
    let stored = parse_octal(&header[TAR_CHKSUM_RANGE])?;
    let mut sum = 0u64;
    for (idx, &b) in header[..TAR_BLOCK_SIZE].iter().enumerate() {
        if TAR_CHKSUM_RANGE.contains(&idx) {
            sum += 0x20;
        } else {
            sum += b as u64;
        }
    }
    Some(sum == stored)
}
