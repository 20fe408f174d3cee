//! Loading and summarizing recorded diagnostics.

use crate::TelemetryError;
use crate::model::{DiagnosticRecord, Stage};
use serde::Serialize;
use std::path::Path;

/// Aggregate view over a set of records.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplaySummary {
    pub records: usize,
    pub avg_final_tokens: f64,
    pub max_final_tokens: i64,
    pub memories_dropped: i64,
    pub memories_oversized: i64,
    pub history_dropped: i64,
    /// Records whose cross-channel content overran its nominal budget.
    pub cross_channel_overruns: usize,
    /// Records whose final prompt was measured above the context window.
    pub over_window: usize,
}

/// Read a JSONL file written by `JsonlRecorder`. Blank lines are ignored.
pub fn load_records(path: &Path) -> Result<Vec<DiagnosticRecord>, TelemetryError> {
    let content = std::fs::read_to_string(path).map_err(|source| TelemetryError::Io {
        path: path.display().to_string(),
        source,
    })?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| TelemetryError::MalformedRecord {
                line: i + 1,
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Summarize budget usage across records.
pub fn summarize(records: &[DiagnosticRecord]) -> ReplaySummary {
    let mut summary = ReplaySummary {
        records: records.len(),
        ..Default::default()
    };
    let mut final_total = 0i64;
    let mut final_count = 0i64;

    for record in records {
        if let Some(tokens) = record.int(Stage::FinalPrompt, "total_tokens") {
            final_total += tokens;
            final_count += 1;
            summary.max_final_tokens = summary.max_final_tokens.max(tokens);
            if let Some(window) = record.int(Stage::FinalPrompt, "context_window") {
                if tokens > window {
                    summary.over_window += 1;
                }
            }
        }
        summary.memories_dropped += record.int(Stage::MemorySelection, "dropped").unwrap_or(0);
        summary.memories_oversized += record
            .int(Stage::MemorySelection, "oversized")
            .unwrap_or(0);
        summary.history_dropped += record.int(Stage::HistorySelection, "dropped").unwrap_or(0);
        if record.int(Stage::CrossChannel, "overrun").unwrap_or(0) > 0 {
            summary.cross_channel_overruns += 1;
        }
    }

    if final_count > 0 {
        summary.avg_final_tokens = final_total as f64 / final_count as f64;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StageRecord;
    use crate::recorder::{DiagnosticSink, JsonlRecorder};

    fn record(total: usize, window: usize, overrun: usize) -> DiagnosticRecord {
        let mut r = DiagnosticRecord::new("req", "Lila");
        r.push(
            StageRecord::new(Stage::MemorySelection)
                .with("dropped", 2usize)
                .with("oversized", 1usize),
        );
        r.push(StageRecord::new(Stage::HistorySelection).with("dropped", 3usize));
        r.push(StageRecord::new(Stage::CrossChannel).with("overrun", overrun));
        r.push(
            StageRecord::new(Stage::FinalPrompt)
                .with("total_tokens", total)
                .with("context_window", window),
        );
        r
    }

    #[test]
    fn summarize_aggregates() {
        let records = vec![record(1000, 8000, 0), record(9000, 8000, 40)];
        let s = summarize(&records);
        assert_eq!(s.records, 2);
        assert_eq!(s.max_final_tokens, 9000);
        assert!((s.avg_final_tokens - 5000.0).abs() < f64::EPSILON);
        assert_eq!(s.memories_dropped, 4);
        assert_eq!(s.memories_oversized, 2);
        assert_eq!(s.history_dropped, 6);
        assert_eq!(s.cross_channel_overruns, 1);
        assert_eq!(s.over_window, 1);
    }

    #[test]
    fn summarize_empty() {
        let s = summarize(&[]);
        assert_eq!(s.records, 0);
        assert_eq!(s.avg_final_tokens, 0.0);
    }

    #[test]
    fn load_roundtrip_through_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = JsonlRecorder::in_dir(dir.path()).unwrap();
        recorder.record(record(500, 8000, 0)).unwrap();

        let loaded = load_records(recorder.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].int(Stage::FinalPrompt, "total_tokens"), Some(500));
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "\n{not json}\n").unwrap();
        let err = load_records(&path).unwrap_err();
        assert!(matches!(err, TelemetryError::MalformedRecord { line: 2, .. }));
    }
}
