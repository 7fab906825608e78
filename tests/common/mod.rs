//! Shared helpers for building small archives and collecting results.

#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use archive_dsp::{IngestCallback, IngestResult};
use crossbeam_channel::{Receiver, unbounded};

pub const WAIT: Duration = Duration::from_secs(10);

/// Name and payload; a `None` payload is a directory marker.
pub type Entry<'a> = (&'a str, Option<&'a [u8]>);

pub fn write_zip(path: &Path, entries: &[Entry<'_>]) {
    let mut writer = zip::ZipWriter::new(File::create(path).expect("create zip"));
    let options = zip::write::FileOptions::default();
    for (name, data) in entries {
        match data {
            Some(data) => {
                writer.start_file(*name, options).expect("start file");
                writer.write_all(data).expect("write entry");
            }
            None => writer.add_directory(*name, options).expect("add directory"),
        }
    }
    writer.finish().expect("finish zip");
}

/// Build a tar stream with raw header names, bypassing the builder's own
/// path checks so hostile names can be produced.
pub fn tar_bytes(entries: &[Entry<'_>]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in entries {
        let mut header = tar::Header::new_old();
        let raw = name.as_bytes();
        header.as_old_mut().name[..raw.len()].copy_from_slice(raw);
        header.set_mode(0o644);
        match data {
            Some(data) => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_size(data.len() as u64);
                header.set_cksum();
                builder.append(&header, *data).expect("append file");
            }
            None => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_size(0);
                header.set_cksum();
                builder.append(&header, std::io::empty()).expect("append dir");
            }
        }
    }
    builder.into_inner().expect("finish tar")
}

pub fn write_tar(path: &Path, entries: &[Entry<'_>]) {
    fs::write(path, tar_bytes(entries)).expect("write tar");
}

pub fn write_tar_gz(path: &Path, entries: &[Entry<'_>]) {
    let file = File::create(path).expect("create tgz");
    let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    encoder.write_all(&tar_bytes(entries)).expect("gzip tar");
    encoder.finish().expect("finish gzip");
}

pub fn channel_callback() -> (IngestCallback, Receiver<IngestResult>) {
    let (tx, rx) = unbounded();
    let callback: IngestCallback = Box::new(move |result| {
        let _ = tx.send(result);
    });
    (callback, rx)
}

/// Every regular file under `root`, relative and `/`-joined, sorted.
pub fn list_files(root: &Path) -> Vec<(String, Vec<u8>)> {
    let mut out = Vec::new();
    collect(root, root, &mut out);
    out.sort();
    out
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<(String, Vec<u8>)>) {
    for entry in fs::read_dir(dir).expect("read dir") {
        let path: PathBuf = entry.expect("dir entry").path();
        if path.is_dir() {
            collect(root, &path, out);
        } else {
            let rel = path
                .strip_prefix(root)
                .expect("under root")
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            out.push((rel, fs::read(&path).expect("read file")));
        }
    }
}

/// Names of the directories directly under `root`.
pub fn subdirectories(root: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(root)
        .expect("read root")
        .map(|e| e.expect("entry").path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}
