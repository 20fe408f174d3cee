//! Diagnostic recording for Chorus prompt assemblies.
//!
//! Every intermediate value of an assembly (budgets, selection counts,
//! section lengths, overruns) can be captured as a [`DiagnosticRecord`] and
//! handed to a [`DiagnosticSink`] for later replay. Recording is a side
//! channel: a failing sink is logged and ignored, never surfaced to the
//! assembly that produced the record.

pub mod model;
pub mod recorder;
pub mod replay;

pub use model::{DiagnosticRecord, Stage, StageRecord, StageValue};
pub use recorder::{DiagnosticSink, InMemoryRecorder, JsonlRecorder, NoopRecorder};
pub use replay::{ReplaySummary, load_records, summarize};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },
}
