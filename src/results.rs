//! # Receipt Result Storage
//!
//! Parsed receipts land in a single JSON array on a shared mount, readable by
//! the scripts and downstream jobs that consume it. The array is rewritten
//! through a temporary file in the same directory followed by a rename, so a
//! crash mid-write can never leave a half-serialized file behind. A corrupt or
//! hand-edited results file is tolerated: it is logged and treated as empty
//! rather than failing the pipeline.
//!
//! Alongside the results, the store keeps one raw-lines dump per engine
//! (`debug_last_ocr_<engine>.txt`) so recognition quality can be inspected
//! without re-running OCR.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::parser::ReceiptRecord;

/// Timestamp format for stored results, second precision local time.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A stored recognition result: submission metadata plus the parsed receipt.
///
/// The receipt fields are flattened so consumers see `store`, `items` and
/// `total` at the top level of each entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    /// Local time the result was stored, second precision
    pub timestamp: String,
    /// Filename the receipt was uploaded as
    pub file: String,
    /// Engine that recognized the receipt
    pub engine: String,
    #[serde(flatten)]
    pub receipt: ReceiptRecord,
}

impl ResultEntry {
    /// Build an entry for a freshly parsed receipt, stamped with the current time.
    pub fn new(file: impl Into<String>, engine: impl Into<String>, receipt: ReceiptRecord) -> Self {
        Self {
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            file: file.into(),
            engine: engine.into(),
            receipt,
        }
    }
}

/// Outcome of a per-file status lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultStatus {
    /// Nothing has ever been stored
    NoResults,
    /// Results exist but none for the requested file yet
    Processing,
    /// Most recent stored result for the requested file
    Done(ResultEntry),
}

/// Disk-backed store for recognition results.
///
/// All mutation goes through a single lock. The file itself is the source of
/// truth; every operation re-reads it, so external consumers may truncate or
/// rotate the file between requests without confusing the service.
pub struct ResultStore {
    results_path: PathBuf,
    debug_dir: PathBuf,
    lock: Mutex<()>,
}

impl ResultStore {
    /// Create a store writing to the given results file and debug directory.
    pub fn new(results_path: impl Into<PathBuf>, debug_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_path: results_path.into(),
            debug_dir: debug_dir.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the results file.
    pub fn results_path(&self) -> &Path {
        &self.results_path
    }

    /// Verify the store can write its results file. Used by readiness checks.
    pub fn validate_writable(&self) -> Result<()> {
        let parent = self
            .results_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).with_context(|| {
            format!(
                "Failed to create results directory: {}",
                parent.display()
            )
        })?;

        crate::path_validation::validate_path_for_writing(&self.results_path.to_string_lossy())
            .map_err(|e| anyhow::anyhow!("Results path rejected: {}", e))?;

        Ok(())
    }

    /// Append one result to the store.
    ///
    /// Read-modify-write under the store lock. The existing file is reloaded
    /// on every append so results survive service restarts.
    pub fn append(&self, entry: ResultEntry) -> Result<()> {
        let _guard = self.lock.lock();

        let mut results = self.load_unlocked();
        results.push(entry);

        self.write_atomic(&results)?;

        info!(
            "Stored receipt result #{} in {}",
            results.len(),
            self.results_path.display()
        );
        Ok(())
    }

    /// Look up the most recent result for an uploaded file.
    pub fn lookup(&self, file: &str) -> ResultStatus {
        let _guard = self.lock.lock();

        if !self.results_path.exists() {
            return ResultStatus::NoResults;
        }

        let results = self.load_unlocked();
        match results.into_iter().rev().find(|entry| entry.file == file) {
            Some(entry) => ResultStatus::Done(entry),
            None => ResultStatus::Processing,
        }
    }

    /// All stored results, oldest first. `None` when nothing was ever stored.
    pub fn snapshot(&self) -> Option<Vec<ResultEntry>> {
        let _guard = self.lock.lock();

        if !self.results_path.exists() {
            return None;
        }
        Some(self.load_unlocked())
    }

    /// Write the raw recognized lines for an engine to its debug dump.
    ///
    /// Overwrites the previous dump for the same engine. Failures are logged
    /// and swallowed: a debug artifact must never fail the pipeline.
    pub fn dump_debug_lines(&self, engine: &str, lines: &[String]) {
        if let Err(e) = self.try_dump_debug_lines(engine, lines) {
            warn!("Failed to write debug dump for engine '{}': {}", engine, e);
        }
    }

    fn try_dump_debug_lines(&self, engine: &str, lines: &[String]) -> Result<()> {
        fs::create_dir_all(&self.debug_dir).with_context(|| {
            format!(
                "Failed to create debug directory: {}",
                self.debug_dir.display()
            )
        })?;

        let safe_engine = crate::path_validation::sanitize_filename(engine);
        let path = self.debug_dir.join(format!("debug_last_ocr_{safe_engine}.txt"));
        fs::write(&path, lines.join("\n"))
            .with_context(|| format!("Failed to write debug dump: {}", path.display()))?;

        Ok(())
    }

    /// Load the results array, treating a missing or corrupt file as empty.
    fn load_unlocked(&self) -> Vec<ResultEntry> {
        if !self.results_path.exists() {
            return Vec::new();
        }

        match fs::read_to_string(&self.results_path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        "Results file {} is corrupt, treating as empty: {}",
                        self.results_path.display(),
                        e
                    );
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(
                    "Cannot read results file {}: {}",
                    self.results_path.display(),
                    e
                );
                Vec::new()
            }
        }
    }

    /// Serialize the full array to a sibling temp file, then rename over the target.
    fn write_atomic(&self, results: &[ResultEntry]) -> Result<()> {
        let parent = self
            .results_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).with_context(|| {
            format!(
                "Failed to create results directory: {}",
                parent.display()
            )
        })?;

        let tmp = tempfile::NamedTempFile::new_in(parent)
            .context("Failed to create temporary results file")?;
        serde_json::to_writer_pretty(&tmp, results)
            .context("Failed to serialize results array")?;

        tmp.persist(&self.results_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to replace results file {}: {}",
                self.results_path.display(),
                e
            )
        })?;

        Ok(())
    }
}
