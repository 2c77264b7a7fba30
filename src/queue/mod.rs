//! # Record Queue Module
//!
//! The queue is a flat directory of immutable `<timestamp>.txt` files written by
//! an external producer. The upload worker is the only reader and the only
//! deleter; files are never modified in place.

pub mod payload;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::QueueConfig;
use crate::error::Result;

/// One queue file awaiting upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecord {
    source_path: PathBuf,
    record_timestamp: String,
}

impl PendingRecord {
    /// Create a record handle for `path`, deriving the timestamp from the file stem
    ///
    /// Returns `None` when the path has no usable stem.
    pub fn from_path(path: PathBuf) -> Option<Self> {
        let record_timestamp = path.file_stem()?.to_str()?.to_string();
        if record_timestamp.is_empty() {
            return None;
        }
        Some(Self {
            source_path: path,
            record_timestamp,
        })
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Shadow update key, e.g. `1670000000` for `1670000000.txt`
    pub fn record_timestamp(&self) -> &str {
        &self.record_timestamp
    }

    /// Read the raw record body
    pub fn read_body(&self) -> io::Result<String> {
        fs::read_to_string(&self.source_path)
    }
}

/// Directory of pending records
#[derive(Debug, Clone)]
pub struct RecordQueue {
    dir: PathBuf,
    extension: String,
}

impl RecordQueue {
    /// Create a queue over `dir`, matching files with `extension` (without dot)
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(&config.dir, config.extension.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot the records currently in the queue
    ///
    /// Records are sorted by file name. Files added while the snapshot is being
    /// processed are picked up by the next scan. A missing directory is an
    /// empty queue.
    ///
    /// # Errors
    ///
    /// Returns error if the directory exists but cannot be listed
    pub fn scan(&self) -> Result<Vec<PendingRecord>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Queue directory {} does not exist yet", self.dir.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file() {
                continue;
            }
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| ext == self.extension);
            if !matches {
                continue;
            }
            if let Some(record) = PendingRecord::from_path(path) {
                records.push(record);
            }
        }

        records.sort_by(|a, b| a.source_path.cmp(&b.source_path));
        Ok(records)
    }

    /// Remove an uploaded record from the queue
    ///
    /// A record that is already gone counts as removed.
    pub fn remove(&self, record: &PendingRecord) -> Result<()> {
        match fs::remove_file(&record.source_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
