//! JSON file implementation of the core `StateStore` port.
//!
//! Every save copies the current file to `<name>.bak` first, then writes the
//! new document to a temporary sibling and renames it into place, so a crash
//! mid-write leaves either the old or the new file plus the backup.

use std::fs;
use std::path::{Path, PathBuf};

use perpsig_core::storage::{BotState, StateStore, StoreError};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        sibling(&self.path, "bak")
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError {
    let path = path.to_path_buf();
    move |source| StoreError::Io { path, source }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<BotState, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BotState::default()),
            Err(e) => return Err(io_err(&self.path)(e)),
        };
        serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&mut self, state: &BotState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        if self.path.exists() {
            let backup = self.backup_path();
            fs::copy(&self.path, &backup).map_err(io_err(&backup))?;
        }

        let json = serde_json::to_string_pretty(state)?;
        let tmp = sibling(&self.path, "tmp");
        fs::write(&tmp, json).map_err(io_err(&tmp))?;
        fs::rename(&tmp, &self.path).map_err(io_err(&self.path))?;
        debug!(
            path = %self.path.display(),
            positions = state.positions.len(),
            trades = state.trades.len(),
            "state saved"
        );
        Ok(())
    }
}
