use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use relay_logging::relay_warn;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

const SLOT_FILENAME: &str = "last_result.json";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("state directory missing or not writable: {0}")]
    StateDir(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Ensure the state directory exists; create if missing.
pub fn ensure_state_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::StateDir(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::StateDir("path is not a directory".into()));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::StateDir(e.to_string()))?;
    }
    Ok(())
}

/// Atomically write `content` to `{dir}/{filename}` through a temp file.
pub fn write_atomically(dir: &Path, filename: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
    ensure_state_dir(dir)?;

    let target = dir.join(filename);
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.flush()?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(&target).map_err(|e| PersistError::Io(e.error))?;
    Ok(target)
}

/// The most recent generated card, kept for pickup after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastResult {
    pub image_ref: String,
    pub text: String,
    pub url: String,
    pub saved_at_ms: u64,
}

/// One best-effort slot: last write wins, a read consumes it.
#[derive(Debug)]
pub struct LastResultSlot {
    dir: PathBuf,
    guard: Mutex<()>,
}

impl LastResultSlot {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(SLOT_FILENAME)
    }

    pub fn save(&self, result: &LastResult) -> Result<(), PersistError> {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        let content = serde_json::to_vec_pretty(result)?;
        write_atomically(&self.dir, SLOT_FILENAME, &content)?;
        Ok(())
    }

    /// Returns the stored result once and clears the slot. A corrupt slot is
    /// discarded and reads as empty.
    pub fn take(&self) -> Result<Option<LastResult>, PersistError> {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        let path = self.path();
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        fs::remove_file(&path)?;
        match serde_json::from_slice(&content) {
            Ok(result) => Ok(Some(result)),
            Err(err) => {
                relay_warn!("discarding unreadable last result at {:?}: {}", path, err);
                Ok(None)
            }
        }
    }
}
