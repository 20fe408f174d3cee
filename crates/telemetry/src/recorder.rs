//! Diagnostic sinks.
//!
//! Sinks are shared across concurrent assemblies, so every implementation is
//! `Send + Sync` and synchronizes internally.

use crate::TelemetryError;
use crate::model::DiagnosticRecord;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

/// Receives finished diagnostic records.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, record: DiagnosticRecord) -> Result<(), TelemetryError>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl DiagnosticSink for NoopRecorder {
    fn record(&self, _record: DiagnosticRecord) -> Result<(), TelemetryError> {
        Ok(())
    }
}

/// Keeps the most recent records in memory.
///
/// Oldest records are evicted once `max_records` is reached.
pub struct InMemoryRecorder {
    max_records: usize,
    records: RwLock<Vec<DiagnosticRecord>>,
}

impl InMemoryRecorder {
    pub fn new(max_records: usize) -> Self {
        Self {
            max_records: max_records.max(1),
            records: RwLock::new(Vec::new()),
        }
    }

    /// Most recent records first.
    pub fn recent(&self, limit: usize) -> Vec<DiagnosticRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.iter().rev().take(limit).cloned().collect()
    }

    /// Look up a record by its request nonce.
    pub fn by_request(&self, request_id: &str) -> Option<DiagnosticRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.iter().find(|r| r.request_id == request_id).cloned()
    }

    pub fn count(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for InMemoryRecorder {
    fn default() -> Self {
        Self::new(500)
    }
}

impl DiagnosticSink for InMemoryRecorder {
    fn record(&self, record: DiagnosticRecord) -> Result<(), TelemetryError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        if records.len() >= self.max_records {
            let overflow = records.len() + 1 - self.max_records;
            records.drain(..overflow);
        }
        records.push(record);
        Ok(())
    }
}

/// Appends one JSON document per line to a file, for `chorus replay`.
pub struct JsonlRecorder {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlRecorder {
    /// Record into `<dir>/diagnostics.jsonl`, creating `dir` if needed.
    pub fn in_dir(dir: &Path) -> Result<Self, TelemetryError> {
        std::fs::create_dir_all(dir).map_err(|source| TelemetryError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        Ok(Self::new(dir.join("diagnostics.jsonl")))
    }

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DiagnosticSink for JsonlRecorder {
    fn record(&self, record: DiagnosticRecord) -> Result<(), TelemetryError> {
        let line = serde_json::to_string(&record)?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let io_err = |source: std::io::Error| TelemetryError::Io {
            path: self.path.display().to_string(),
            source,
        };
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        writeln!(file, "{}", line).map_err(io_err)?;
        Ok(())
    }
}
