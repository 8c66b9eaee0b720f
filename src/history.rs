//! Execution history.
//!
//! Newest-first log of completed runs, capped at a configurable number of
//! entries. History is best effort: a corrupt file reads as empty and is
//! replaced by the next write. Writers serialize on `<history>.lock` the same
//! way registry writers do.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{Result, RouterError};
use crate::model::RunResult;

/// Entries kept unless configured otherwise.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    pub command_name: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(alias = "returncode")]
    pub return_code: i32,
    pub executed_at: DateTime<Utc>,
    #[serde(alias = "duration")]
    pub duration_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

impl HistoryEntry {
    /// Entry for a finished run invoked as `name args...` from `cwd`.
    pub fn from_run(name: &str, args: &[String], cwd: Option<PathBuf>, run: &RunResult) -> Self {
        Self {
            command_name: name.to_string(),
            args: args.to_vec(),
            return_code: run.return_code,
            executed_at: run.started_at,
            duration_secs: run.duration.as_secs_f64(),
            cwd,
            timed_out: run.timed_out(),
        }
    }
}

#[derive(Serialize, Deserialize, Default)]
struct HistoryDocument {
    #[serde(default)]
    entries: Vec<HistoryEntry>,
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    limit: usize,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>, limit: usize) -> Self {
        Self {
            path: path.into(),
            limit: limit.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries, newest first.
    pub fn load(&self) -> Vec<HistoryEntry> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot read history");
                return Vec::new();
            }
        };
        match serde_json::from_str::<HistoryDocument>(&raw) {
            Ok(doc) => {
                let mut entries = doc.entries;
                entries.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
                entries
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "history file is corrupted, ignoring it");
                Vec::new()
            }
        }
    }

    /// Most recent entries, optionally for one command only.
    pub fn recent(&self, name: Option<&str>, limit: Option<usize>) -> Vec<HistoryEntry> {
        self.load()
            .into_iter()
            .filter(|e| name.is_none_or(|n| e.command_name == n))
            .take(limit.unwrap_or(usize::MAX))
            .collect()
    }

    /// Prepend `entry`, dropping the oldest beyond the limit.
    pub fn record(&self, entry: HistoryEntry) -> Result<()> {
        let _guard = self.lock()?;
        let mut entries = self.load();
        entries.insert(0, entry);
        entries.truncate(self.limit);
        self.save(&entries)
    }

    /// Remove the history file. Returns how many entries were dropped.
    pub fn clear(&self) -> Result<usize> {
        let _guard = self.lock()?;
        let count = self.load().len();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(count),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(RouterError::io(&self.path, e)),
        }
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Exclusive lock on the `.lock` sidecar, released when the file drops.
    fn lock(&self) -> Result<File> {
        let dir = self.parent_dir();
        fs::create_dir_all(&dir).map_err(|e| RouterError::io(&dir, e))?;
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "history".into());
        name.push(".lock");
        let lock_path = self.path.with_file_name(name);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| RouterError::io(&lock_path, e))?;
        file.lock().map_err(|e| RouterError::io(&lock_path, e))?;
        Ok(file)
    }

    fn save(&self, entries: &[HistoryEntry]) -> Result<()> {
        let dir = self.parent_dir();

        let doc = HistoryDocument {
            entries: entries.to_vec(),
        };
        let body = serde_json::to_string_pretty(&doc)
            .map_err(|e| RouterError::InvalidRequest(format!("cannot serialize history: {e}")))?;
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| RouterError::io(&dir, e))?;
        tmp.write_all(body.as_bytes())
            .map_err(|e| RouterError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| RouterError::io(&self.path, e.error))?;
        debug!(path = %self.path.display(), entries = entries.len(), "history saved");
        Ok(())
    }
}
