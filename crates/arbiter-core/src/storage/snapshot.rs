//! JSON snapshot files for process restart continuity

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Default snapshot file name inside a state directory
pub const SNAPSHOT_FILE: &str = "engine-snapshot.json";

/// Reads and writes one pretty-printed JSON snapshot file.
///
/// Writes go to a sibling temp file that is renamed over the target, so a
/// crash mid-write never leaves a truncated snapshot behind.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store [`SNAPSHOT_FILE`] inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(SNAPSHOT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Serialize `value` and atomically replace the snapshot file
    pub fn save<T: Serialize>(&self, value: &T) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let json = serde_json::to_string_pretty(value)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;

        info!(path = %self.path.display(), "Saved snapshot");
        Ok(())
    }

    /// Load the snapshot, or `None` if no file exists yet
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No snapshot to load");
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path)?;
        let value = serde_json::from_str(&contents).map_err(|e| {
            Error::InvalidSnapshot(format!("{}: {}", self.path.display(), e))
        })?;
        Ok(Some(value))
    }

    /// Delete the snapshot file; returns true if one existed
    pub fn remove(&self) -> Result<bool> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
