//! `chorus replay`: summarize recorded diagnostics.

use std::path::Path;

use anyhow::Context;
use chorus_telemetry::{ReplaySummary, load_records, summarize};

pub fn run(path: &Path, json: bool) -> anyhow::Result<()> {
    let records =
        load_records(path).with_context(|| format!("reading records from {}", path.display()))?;
    let summary = summarize(&records);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", render(&summary));
    }
    Ok(())
}

fn render(s: &ReplaySummary) -> String {
    let mut out = String::new();
    out.push_str("📊 Diagnostic Replay\n");
    out.push_str("─────────────────────────────────────\n");
    out.push_str(&format!("  Records:              {}\n", s.records));
    if s.records == 0 {
        return out;
    }
    out.push_str(&format!("  Avg final tokens:     {:.0}\n", s.avg_final_tokens));
    out.push_str(&format!("  Max final tokens:     {}\n", s.max_final_tokens));
    out.push_str(&format!("  Memories dropped:     {}\n", s.memories_dropped));
    out.push_str(&format!("  Memories oversized:   {}\n", s.memories_oversized));
    out.push_str(&format!("  History dropped:      {}\n", s.history_dropped));
    out.push_str(&format!("  Cross-channel overrun {}\n", s.cross_channel_overruns));
    let status = if s.over_window > 0 { "⛔" } else { "✅" };
    out.push_str(&format!("  Over window:          {} {}\n", s.over_window, status));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_telemetry::{DiagnosticRecord, DiagnosticSink, JsonlRecorder, Stage, StageRecord};

    #[test]
    fn replays_recorded_file() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = JsonlRecorder::in_dir(dir.path()).unwrap();
        let mut record = DiagnosticRecord::new("req-1", "Lila");
        record.push(
            StageRecord::new(Stage::FinalPrompt)
                .with("total_tokens", 9000usize)
                .with("context_window", 8000usize),
        );
        recorder.record(record).unwrap();

        let records = load_records(recorder.path()).unwrap();
        let text = render(&summarize(&records));
        assert!(text.contains("Records:              1"));
        assert!(text.contains("Over window:          1 ⛔"));
        run(recorder.path(), true).unwrap();
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = run(Path::new("/nonexistent/diagnostics.jsonl"), false).unwrap_err();
        assert!(format!("{err:#}").contains("reading records"));
    }

    #[test]
    fn empty_summary_stops_after_count() {
        let text = render(&ReplaySummary::default());
        assert!(text.contains("Records:              0"));
        assert!(!text.contains("Avg final tokens"));
    }
}
