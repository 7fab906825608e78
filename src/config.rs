use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use serde::Deserialize;
use sha2::{Digest, Sha256};

const DEFAULT_OUTPUT_ROOT: &str = "./output";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub output_root: String,
    pub copy_buffer_kib: usize,
    pub write_manifest: bool,
    pub thread_name: String,
}

impl Config {
    /// Output root with the empty-string default applied.
    pub fn output_root(&self) -> PathBuf {
        if self.output_root.trim().is_empty() {
            PathBuf::from(DEFAULT_OUTPUT_ROOT)
        } else {
            PathBuf::from(&self.output_root)
        }
    }

    pub fn copy_buffer_bytes(&self) -> usize {
        self.copy_buffer_kib.saturating_mul(1024)
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub config_hash: String,
}

pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig> {
    let bytes: Vec<u8> = if let Some(p) = path {
        std::fs::read(p)?
    } else {
        include_bytes!("../config/default.yml").to_vec()
    };

    let mut config: Config = serde_yaml::from_slice(&bytes)?;
    if config.copy_buffer_kib == 0 {
        bail!("copy_buffer_kib must be greater than zero");
    }
    if config.thread_name.trim().is_empty() {
        config.thread_name = "archive-dsp".to_string();
    }

    let config_hash = hash_bytes(&bytes);

    Ok(LoadedConfig {
        config,
        config_hash,
    })
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::load_config;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn loads_embedded_defaults() {
        let loaded = load_config(None).expect("config");
        assert_eq!(loaded.config.copy_buffer_kib, 512);
        assert_eq!(loaded.config.copy_buffer_bytes(), 512 * 1024);
        assert!(loaded.config.write_manifest);
        assert_eq!(loaded.config.output_root(), PathBuf::from("./output"));
        assert_eq!(loaded.config_hash.len(), 64);
    }

    #[test]
    fn rejects_zero_buffer() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("cfg.yml");
        std::fs::write(
            &path,
            "output_root: out\ncopy_buffer_kib: 0\nwrite_manifest: false\nthread_name: x\n",
        )
        .expect("write config");
        let err = load_config(Some(&path)).expect_err("should fail");
        assert!(err.to_string().contains("copy_buffer_kib"));
    }

    #[test]
    fn blank_thread_name_falls_back() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("cfg.yml");
        std::fs::write(
            &path,
            "output_root: out\ncopy_buffer_kib: 4\nwrite_manifest: false\nthread_name: \"\"\n",
        )
        .expect("write config");
        let loaded = load_config(Some(&path)).expect("config");
        assert_eq!(loaded.config.thread_name, "archive-dsp");
        assert_eq!(loaded.config.output_root(), PathBuf::from("out"));
    }
}
