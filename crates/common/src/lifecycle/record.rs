//! Pid records for running coordinators
//!
//! One JSON file per run, `<dir>/<run_id>.json`, holding the coordinator's
//! pid. Records exist only so a later stop request can find the process.

use crate::types::now_millis;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    pub pid: u32,
    pub run_id: String,
    /// Unix milliseconds when the process was spawned.
    pub timestamp: i64,
}

impl ProcessRecord {
    pub fn new(run_id: impl Into<String>, pid: u32) -> Self {
        Self {
            pid,
            run_id: run_id.into(),
            timestamp: now_millis(),
        }
    }
}

/// Directory-backed store of [`ProcessRecord`]s.
#[derive(Debug, Clone)]
pub struct ProcessRecordStore {
    dir: PathBuf,
}

impl ProcessRecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &str) -> Result<PathBuf> {
        let valid = !run_id.is_empty()
            && run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(Error::InvalidInput(format!("invalid run id '{}'", run_id)));
        }
        Ok(self.dir.join(format!("{}.json", run_id)))
    }

    /// Write a record, replacing any previous one for the same run.
    pub fn save(&self, record: &ProcessRecord) -> Result<()> {
        let path = self.path_for(&record.run_id)?;
        std::fs::create_dir_all(&self.dir)?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(record)?)?;
        std::fs::rename(&tmp, &path)?;

        debug!("Saved pid record {} -> {}", record.run_id, record.pid);
        Ok(())
    }

    pub fn load(&self, run_id: &str) -> Result<Option<ProcessRecord>> {
        let path = self.path_for(run_id)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a record. Returns whether one existed.
    pub fn remove(&self, run_id: &str) -> Result<bool> {
        let path = self.path_for(run_id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed pid record {}", run_id);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// All readable records. Corrupt files are logged and skipped.
    pub fn list(&self) -> Result<Vec<ProcessRecord>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let parsed = std::fs::read(&path)
                .map_err(Error::from)
                .and_then(|bytes| serde_json::from_slice(&bytes).map_err(Error::from));
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable pid record {:?}: {}", path, e),
            }
        }
        records.sort_by_key(|r: &ProcessRecord| r.timestamp);
        Ok(records)
    }
}
