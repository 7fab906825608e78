//! Configuration collaborator.
//!
//! The processor only relies on [`ConfigPanel::content_path`] and
//! [`ConfigPanel::validate_panel`]; the remaining hooks exist so a host UI
//! can persist and restore its own settings.

use std::path::{Path, PathBuf};

use tracing::debug;

pub trait ConfigPanel: Send {
    /// Load previously stored settings into the panel.
    fn read_settings(&mut self);
    /// Called when the panel is shown.
    fn select(&mut self);
    /// Persist the current settings.
    fn store_settings(&mut self);
    /// Whether a run may be started with the current settings.
    fn validate_panel(&self) -> bool;
    /// The chosen archive path, if any.
    fn content_path(&self) -> Option<PathBuf>;
    fn reset(&mut self);
}

/// Panel backed by a single path chosen programmatically, e.g. from the
/// command line. "Stored" settings live in memory only.
#[derive(Debug, Default, Clone)]
pub struct PathPanel {
    selected: Option<PathBuf>,
    stored: Option<PathBuf>,
}

impl PathPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            selected: Some(path.into()),
            stored: None,
        }
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.selected = Some(path.into());
    }

    pub fn stored_path(&self) -> Option<&Path> {
        self.stored.as_deref()
    }
}

impl ConfigPanel for PathPanel {
    fn read_settings(&mut self) {
        if self.selected.is_none() {
            self.selected = self.stored.clone();
        }
    }

    fn select(&mut self) {}

    fn store_settings(&mut self) {
        self.stored = self.selected.clone();
    }

    fn validate_panel(&self) -> bool {
        match &self.selected {
            Some(path) => {
                let ok = path.is_file();
                if !ok {
                    debug!("panel path is not a readable file: {}", path.display());
                }
                ok
            }
            None => false,
        }
    }

    fn content_path(&self) -> Option<PathBuf> {
        self.selected.clone()
    }

    fn reset(&mut self) {
        self.selected = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_only_existing_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut panel = PathPanel::new();
        assert!(!panel.validate_panel());

        panel.set_path(dir.path());
        assert!(!panel.validate_panel());

        let file = dir.path().join("a.zip");
        std::fs::write(&file, b"x").expect("write");
        panel.set_path(&file);
        assert!(panel.validate_panel());
    }

    #[test]
    fn stored_settings_survive_reset() {
        let mut panel = PathPanel::with_path("/cases/a.zip");
        panel.store_settings();
        panel.reset();
        assert_eq!(panel.content_path(), None);

        panel.read_settings();
        assert_eq!(panel.content_path(), Some(PathBuf::from("/cases/a.zip")));
        assert_eq!(panel.stored_path(), Some(Path::new("/cases/a.zip")));
    }
}
