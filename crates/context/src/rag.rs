//! The orchestrator: one prompt assembly per request.
//!
//! # Flow
//!
//! 1. Attach image descriptions to history entries
//! 2. Build the human message and measure it
//! 3. Build the memory-free base prompt and measure it
//! 4. Size and select memories, rebuild the prompt with them
//! 5. Re-measure, size history (minus any retry reduction), select it
//! 6. Build the final prompt and record diagnostics
//!
//! Budgets are computed in strict sequence: each depends on the measured
//! output of the previous step.

use std::collections::HashSet;
use std::sync::Arc;

use chorus_core::{
    ConversationEntry, CrossChannelGroup, EntryId, ImageDescription, MemoryDocument, MemoryQuery,
    MemoryRetriever, Participant, QuotedMessage, Result, TokenCounter,
};
use chorus_telemetry::{DiagnosticRecord, DiagnosticSink, NoopRecorder, Stage, StageRecord};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::assembler::{AssembledPrompt, PromptParts, SectionLength, build_system_prompt};
use crate::budget::{
    TokenBudget, apply_reduction, calculate_history_budget, calculate_memory_budget,
    estimate_history_reservation,
};
use crate::request::{EngineOptions, RequestContext};
use crate::select::{
    CrossChannelOptions, CrossChannelSelection, HistorySelection, MemorySelection,
    select_all_history, select_memories,
};
use crate::serialize::{SpeakerNames, render_memory_archive};
use crate::turn::{CurrentTurn, HumanMessage, build_human_message, inject_image_descriptions};

// ── Request / result ──────────────────────────────────────────────────────

/// Everything needed to assemble one prompt.
#[derive(Debug, Clone)]
pub struct ContextRequest {
    pub context: RequestContext,
    pub turn: CurrentTurn,
    /// Current-channel history, oldest first
    pub history: Vec<ConversationEntry>,
    /// Other channels the user was recently active in, oldest group first
    pub cross_channel: Vec<CrossChannelGroup>,
    pub participants: Vec<Participant>,
    /// Vision captions keyed by transport message id
    pub image_descriptions: Vec<ImageDescription>,
    /// Retry shrink applied to the history budget (0..=100)
    pub history_reduction_pct: u8,
}

impl ContextRequest {
    pub fn new(context: RequestContext, turn: CurrentTurn) -> Self {
        Self {
            context,
            turn,
            history: Vec::new(),
            cross_channel: Vec::new(),
            participants: Vec::new(),
            image_descriptions: Vec::new(),
            history_reduction_pct: 0,
        }
    }

    pub fn with_history(mut self, history: Vec<ConversationEntry>) -> Self {
        self.history = history;
        self
    }

    pub fn with_cross_channel(mut self, groups: Vec<CrossChannelGroup>) -> Self {
        self.cross_channel = groups;
        self
    }

    pub fn with_participants(mut self, participants: Vec<Participant>) -> Self {
        self.participants = participants;
        self
    }

    pub fn with_image_descriptions(mut self, descriptions: Vec<ImageDescription>) -> Self {
        self.image_descriptions = descriptions;
        self
    }

    pub fn with_history_reduction(mut self, percent: u8) -> Self {
        self.history_reduction_pct = percent.min(100);
        self
    }

    /// The retrieval query for this turn.
    pub fn memory_query(&self, options: &EngineOptions) -> MemoryQuery {
        let mut query = MemoryQuery::new(
            self.turn.content.as_str(),
            self.context.personality.id.as_str(),
        );
        query.persona_id = self.turn.persona_id.clone();
        query.limit = options.memory_limit;
        query.min_score = options.memory_min_score;
        query.exclude_entry_ids = self
            .history
            .iter()
            .map(|e| e.id.as_str().to_string())
            .collect();
        query
    }
}

/// A fully assembled prompt, ready for the model.
#[derive(Debug, Clone, Serialize)]
pub struct PreparedContext {
    pub request_id: String,
    pub system_prompt: String,
    pub human_message: HumanMessage,
    pub budget: TokenBudget,
    pub memory: MemorySelection,
    pub history: HistorySelection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cross_channel: Option<CrossChannelSelection>,
    /// Non-empty sections of the final prompt, in order
    pub sections: Vec<SectionLength>,
}

impl PreparedContext {
    /// The user text before attachment and reference notes; what gets stored.
    pub fn plain_content(&self) -> &str {
        &self.human_message.plain_content
    }
}

// ── Service ───────────────────────────────────────────────────────────────

/// Stateless prompt assembly service.
///
/// Holds only shared, immutable collaborators; one instance serves every
/// concurrent request.
pub struct RagService {
    retriever: Option<Arc<dyn MemoryRetriever>>,
    counter: Arc<dyn TokenCounter>,
    options: EngineOptions,
    recorder: Arc<dyn DiagnosticSink>,
}

impl RagService {
    pub fn new(counter: Arc<dyn TokenCounter>, options: EngineOptions) -> Self {
        Self {
            retriever: None,
            counter,
            options,
            recorder: Arc::new(NoopRecorder),
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn MemoryRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn DiagnosticSink>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Retrieve memory candidates, then assemble.
    pub async fn prepare(&self, request: ContextRequest) -> Result<PreparedContext> {
        let candidates = match &self.retriever {
            Some(retriever) => {
                let query = request.memory_query(&self.options);
                let docs = retriever.retrieve(&query).await?;
                debug!(
                    retriever = retriever.name(),
                    candidates = docs.len(),
                    "Memory candidates retrieved"
                );
                docs
            }
            None => Vec::new(),
        };
        self.build_context(request, &candidates)
    }

    /// Assemble a prompt from already-retrieved, rank-ordered candidates.
    pub fn build_context(
        &self,
        request: ContextRequest,
        candidates: &[MemoryDocument],
    ) -> Result<PreparedContext> {
        let ContextRequest {
            context: ctx,
            turn,
            mut history,
            mut cross_channel,
            participants,
            image_descriptions,
            history_reduction_pct,
        } = request;
        let counter = self.counter.as_ref();
        let window = self.options.window_for(&ctx.personality);
        let mut record = DiagnosticRecord::new(ctx.request_id.as_str(), ctx.personality_name());

        // ── Step 1: Attachments ──
        if !image_descriptions.is_empty() {
            let mut injected = inject_image_descriptions(&mut history, &image_descriptions);
            for group in &mut cross_channel {
                injected += inject_image_descriptions(&mut group.entries, &image_descriptions);
            }
            debug!(injected, "Image descriptions attached");
        }

        // ── Step 2: Human message ──
        let human_message = build_human_message(&turn);
        let current_tokens = counter.count(&human_message.content)?;

        // ── Step 3: Base prompt ──
        let names = SpeakerNames::collect(
            ctx.personality_name(),
            history
                .iter()
                .chain(cross_channel.iter().flat_map(|g| g.entries.iter())),
            &participants,
        );
        let self_collisions = names.self_collisions(&participants, &history);
        let no_ids = HashSet::new();
        let prompt = |archive: &str, chat_log: &str, included: &HashSet<EntryId>| {
            self.assemble(
                &ctx,
                &names,
                &participants,
                &self_collisions,
                &turn.references,
                archive,
                chat_log,
                included,
            )
        };

        let base = prompt("", "", &no_ids);
        let base_tokens = counter.count(&base.text)?;
        record.push(
            StageRecord::new(Stage::BasePrompt)
                .with("tokens", base_tokens)
                .with("chars", base.text.len())
                .with("current_message_tokens", current_tokens),
        );

        // ── Step 4: Memories ──
        let reservation = estimate_history_reservation(
            &history,
            window,
            self.options.history_reserve_ratio,
            self.options.chars_per_token,
        );
        let memory_budget =
            calculate_memory_budget(window, base_tokens, current_tokens, reservation);
        record.push(
            StageRecord::new(Stage::MemoryBudget)
                .with("budget", memory_budget)
                .with("history_reservation", reservation)
                .with("context_window", window),
        );

        let empty_archive = prompt(&render_memory_archive(&[String::new()]), "", &no_ids);
        let archive_overhead = counter.count(&empty_archive.text)?.saturating_sub(base_tokens);
        let memory = select_memories(&ctx, candidates, memory_budget, archive_overhead, counter)?;
        record.push(
            StageRecord::new(Stage::MemorySelection)
                .with("considered", memory.considered())
                .with("selected", memory.selected.len())
                .with("tokens_used", memory.tokens_used)
                .with("archive_overhead", memory.overhead)
                .with("dropped", memory.dropped)
                .with("oversized", memory.oversized),
        );
        let archive = render_memory_archive(&memory.lines);

        // ── Step 5: History ──
        let with_memory = prompt(&archive, "", &no_ids);
        let with_memory_tokens = counter.count(&with_memory.text)?;
        let nominal = calculate_history_budget(window, with_memory_tokens, current_tokens, 0);
        let history_budget = apply_reduction(nominal, history_reduction_pct);
        record.push(
            StageRecord::new(Stage::HistoryBudget)
                .with("prompt_with_memory_tokens", with_memory_tokens)
                .with("nominal", nominal)
                .with("reduction_pct", usize::from(history_reduction_pct))
                .with("budget", history_budget),
        );

        let groups: &[CrossChannelGroup] = if self.options.cross_channel_enabled {
            &cross_channel
        } else {
            &[]
        };
        let outcome = select_all_history(
            &ctx,
            &history,
            groups,
            history_budget,
            &names,
            &CrossChannelOptions::from(&self.options),
            counter,
        )?;
        record.push(
            StageRecord::new(Stage::HistorySelection)
                .with("included", outcome.current.included)
                .with("dropped", outcome.current.dropped)
                .with("tokens_used", outcome.current.tokens_used),
        );
        if let Some(cross) = &outcome.cross_channel {
            record.push(
                StageRecord::new(Stage::CrossChannel)
                    .with("budget", cross.budget)
                    .with("estimated_tokens", cross.estimated_tokens)
                    .with("measured_tokens", cross.measured_tokens)
                    .with("overrun", cross.overrun)
                    .with("groups_included", cross.groups_included)
                    .with("groups_discarded", cross.groups_discarded),
            );
        }

        // ── Step 6: Final prompt ──
        let chat_log = outcome.markup();
        let final_prompt = prompt(&archive, &chat_log, outcome.included_ids());
        let final_tokens = counter.count(&final_prompt.text)?;
        let total = final_tokens + current_tokens;
        if total > window {
            warn!(
                request_id = %ctx.request_id,
                total,
                window,
                "Assembled prompt measures above the context window"
            );
        }
        record.push(
            StageRecord::new(Stage::FinalPrompt)
                .with("tokens", final_tokens)
                .with("total_tokens", total)
                .with("context_window", window)
                .with("sections", final_prompt.sections.len())
                .with("chars", final_prompt.text.len()),
        );

        let budget = TokenBudget {
            context_window_tokens: window,
            system_prompt_tokens: base_tokens,
            current_message_tokens: current_tokens,
            memory_budget,
            memory_tokens_used: memory.tokens_used,
            history_budget,
            history_tokens_used: outcome.current.tokens_used,
            cross_channel_tokens_used: outcome.cross_channel_tokens(),
            final_prompt_tokens: final_tokens,
        };

        record.finish(&final_prompt.text, &human_message.content);
        if let Err(e) = self.recorder.record(record) {
            warn!(request_id = %ctx.request_id, error = %e, "Failed to record diagnostics");
        }

        info!(
            request_id = %ctx.request_id,
            personality = %ctx.personality.name,
            memories = memory.selected.len(),
            history = outcome.current.included,
            history_dropped = outcome.current.dropped,
            final_tokens,
            window,
            utilization_pct = f64::from(budget.utilization_pct()),
            "Context prepared"
        );

        let AssembledPrompt { text, sections } = final_prompt;
        Ok(PreparedContext {
            request_id: ctx.request_id.clone(),
            system_prompt: text,
            human_message,
            budget,
            memory,
            history: outcome.current,
            cross_channel: outcome.cross_channel,
            sections,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        ctx: &RequestContext,
        names: &SpeakerNames,
        participants: &[Participant],
        self_collisions: &[String],
        references: &[QuotedMessage],
        memory_archive: &str,
        chat_log: &str,
        included_ids: &HashSet<EntryId>,
    ) -> AssembledPrompt {
        build_system_prompt(&PromptParts {
            ctx,
            options: &self.options,
            names,
            participants,
            self_collisions,
            references,
            memory_archive,
            chat_log,
            included_ids,
        })
    }
}
