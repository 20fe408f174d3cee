//! `chorus assemble`: assemble one prompt from a JSON request file.
//!
//! The request file carries everything a host would normally gather from its
//! stores: the personality, the current turn, raw history records, other
//! channels, participants, and already-ranked memory candidates.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chorus_config::ContextConfig;
use chorus_context::{
    ContextRequest, CurrentTurn, EngineOptions, Location, PreparedContext, RagService,
    RequestContext,
};
use chorus_core::{
    CrossChannelGroup, HeuristicCounter, ImageDescription, MemoryDocument, MemoryQuery,
    MemoryRetriever, Participant, Personality, RawEntry, RetrievalError, TokenCounter,
    normalize_entries,
};
use chorus_telemetry::{DiagnosticSink, InMemoryRecorder, JsonlRecorder, NoopRecorder};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::load_config;

pub struct AssembleArgs {
    pub request: PathBuf,
    pub json: bool,
    pub window: Option<usize>,
    pub reduction: Option<u8>,
    pub tokenizer: Option<PathBuf>,
}

// ── Request file ──────────────────────────────────────────────────────────

/// History of another channel, before normalization.
#[derive(Debug, Deserialize)]
pub struct RawGroup {
    pub channel_name: String,
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default)]
    pub entries: Vec<RawEntry>,
}

/// On-disk shape of an assembly request.
#[derive(Debug, Deserialize)]
pub struct RequestFile {
    pub personality: Personality,
    /// IANA timezone of the requester
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub location: Option<Location>,
    pub turn: CurrentTurn,
    #[serde(default)]
    pub history: Vec<RawEntry>,
    #[serde(default)]
    pub cross_channel: Vec<RawGroup>,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub image_descriptions: Vec<ImageDescription>,
    /// Memory candidates, served through an in-process retriever
    #[serde(default)]
    pub memories: Vec<MemoryDocument>,
    #[serde(default)]
    pub history_reduction_pct: u8,
}

impl RequestFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading request file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing request file {}", path.display()))
    }

    /// Split into the engine request and the memory candidates.
    pub fn into_parts(self, options: &EngineOptions) -> (ContextRequest, Vec<MemoryDocument>) {
        let mut ctx = RequestContext::new(self.personality);
        ctx = match self.timezone.as_deref() {
            Some(name) => ctx.with_timezone_name(name, options.default_timezone),
            None => ctx.with_timezone(options.default_timezone),
        };
        if let Some(now) = self.now {
            ctx = ctx.with_now(now);
        }
        if let Some(id) = self.request_id {
            ctx = ctx.with_request_id(id);
        }
        if let Some(location) = self.location {
            ctx = ctx.with_location(location);
        }

        let groups = self
            .cross_channel
            .into_iter()
            .map(|g| CrossChannelGroup {
                channel_name: g.channel_name,
                server_name: g.server_name,
                entries: normalize_entries(g.entries),
            })
            .filter(|g| !g.entries.is_empty())
            .collect();

        let request = ContextRequest::new(ctx, self.turn)
            .with_history(normalize_entries(self.history))
            .with_cross_channel(groups)
            .with_participants(self.participants)
            .with_image_descriptions(self.image_descriptions)
            .with_history_reduction(self.history_reduction_pct);

        (request, self.memories)
    }
}

// ── In-process retriever ──────────────────────────────────────────────────

/// Serves the memories listed in the request file, honoring the query's
/// score threshold and limit.
pub struct FileRetriever {
    memories: Vec<MemoryDocument>,
}

impl FileRetriever {
    pub fn new(mut memories: Vec<MemoryDocument>) -> Self {
        // Stable: equal scores keep file order.
        memories.sort_by(|a, b| b.metadata.score.total_cmp(&a.metadata.score));
        Self { memories }
    }
}

#[async_trait]
impl MemoryRetriever for FileRetriever {
    fn name(&self) -> &str {
        "request_file"
    }

    async fn retrieve(&self, query: &MemoryQuery) -> Result<Vec<MemoryDocument>, RetrievalError> {
        Ok(self
            .memories
            .iter()
            .filter(|m| m.metadata.score >= query.min_score)
            .take(query.limit)
            .cloned()
            .collect())
    }
}

// ── Command ───────────────────────────────────────────────────────────────

pub async fn run(config_path: Option<&Path>, args: AssembleArgs) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let options = EngineOptions::from(&config);

    let file = RequestFile::load(&args.request)?;
    let (mut request, memories) = file.into_parts(&options);
    if let Some(window) = args.window {
        request.context.personality.context_window_tokens = Some(window);
    }
    if let Some(pct) = args.reduction {
        request = request.with_history_reduction(pct);
    }

    let counter = build_counter(args.tokenizer.as_deref(), &options)?;
    debug!(counter = counter.name(), "Token counter ready");

    let service = RagService::new(counter, options)
        .with_retriever(Arc::new(FileRetriever::new(memories)))
        .with_recorder(build_recorder(&config)?);
    let prepared = service.prepare(request).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&prepared)?);
    } else {
        print!("{}", render_report(&prepared));
    }
    Ok(())
}

fn build_counter(
    tokenizer: Option<&Path>,
    options: &EngineOptions,
) -> anyhow::Result<Arc<dyn TokenCounter>> {
    match tokenizer {
        #[cfg(feature = "hf-tokenizer")]
        Some(path) => Ok(Arc::new(chorus_core::HfTokenCounter::from_file(path)?)),
        #[cfg(not(feature = "hf-tokenizer"))]
        Some(path) => anyhow::bail!(
            "cannot load {}: chorus was built without the hf-tokenizer feature",
            path.display()
        ),
        None => Ok(Arc::new(HeuristicCounter::new(options.chars_per_token))),
    }
}

fn build_recorder(config: &ContextConfig) -> anyhow::Result<Arc<dyn DiagnosticSink>> {
    match &config.telemetry.record_dir {
        Some(dir) if config.telemetry.enabled => {
            let recorder = JsonlRecorder::in_dir(dir)
                .with_context(|| format!("opening diagnostics dir {}", dir.display()))?;
            Ok(Arc::new(recorder))
        }
        None if config.telemetry.enabled => {
            Ok(Arc::new(InMemoryRecorder::new(config.telemetry.max_records)))
        }
        _ => Ok(Arc::new(NoopRecorder)),
    }
}

fn render_report(prepared: &PreparedContext) -> String {
    let b = &prepared.budget;
    let mut out = String::new();

    out.push_str("═══ System prompt ═══\n");
    out.push_str(&prepared.system_prompt);
    out.push_str("\n\n═══ Human message ═══\n");
    out.push_str(&prepared.human_message.content);
    out.push_str("\n\n═══ Budget ═══\n");
    out.push_str(&format!("  Request:          {}\n", prepared.request_id));
    out.push_str(&format!("  Window:           {}\n", b.context_window_tokens));
    out.push_str(&format!("  Base prompt:      {}\n", b.system_prompt_tokens));
    out.push_str(&format!("  Current message:  {}\n", b.current_message_tokens));
    out.push_str(&format!(
        "  Memories:         {} / {} ({} kept, {} dropped)\n",
        b.memory_tokens_used,
        b.memory_budget,
        prepared.memory.selected.len(),
        prepared.memory.dropped
    ));
    out.push_str(&format!(
        "  History:          {} / {} ({} kept, {} dropped)\n",
        b.history_tokens_used, b.history_budget, prepared.history.included, prepared.history.dropped
    ));
    if let Some(cc) = &prepared.cross_channel {
        out.push_str(&format!(
            "  Cross-channel:    {} measured, {} groups, {} discarded\n",
            cc.measured_tokens, cc.groups_included, cc.groups_discarded
        ));
    }
    out.push_str(&format!(
        "  Final prompt:     {} ({:.1}% of window)\n",
        b.final_prompt_tokens,
        b.utilization_pct()
    ));
    out.push_str("\n═══ Sections ═══\n");
    for s in &prepared.sections {
        out.push_str(&format!("  {:<22} {:>7} chars\n", s.section.to_string(), s.chars));
    }
    out
}
