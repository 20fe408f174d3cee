//! Current-channel history selection.
//!
//! Walks newest → oldest with the fast character estimate and stops at the
//! first entry that does not fit, so the kept history is always a
//! contiguous, most-recent suffix.

use std::collections::HashSet;

use chorus_core::{ConversationEntry, EntryId};
use chrono::Duration;
use serde::Serialize;
use tracing::debug;

use crate::request::{EngineOptions, RequestContext};
use crate::serialize::{
    HistoryRenderer, SpeakerNames, estimate_entry_tokens, gap_between, time_gap_tokens,
};

/// Estimation knobs shared by current-channel and cross-channel selection.
#[derive(Debug, Clone, Copy)]
pub struct HistoryOptions {
    pub chars_per_token: usize,
    /// Reserved up front for wrapper markup
    pub wrapper_overhead_tokens: usize,
    pub time_gap: Duration,
}

impl From<&EngineOptions> for HistoryOptions {
    fn from(options: &EngineOptions) -> Self {
        Self {
            chars_per_token: options.chars_per_token,
            wrapper_overhead_tokens: options.wrapper_overhead_tokens,
            time_gap: options.time_gap,
        }
    }
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self::from(&EngineOptions::default())
    }
}

/// The most-recent suffix of a channel that fits a budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HistoryWindow {
    /// Index of the oldest kept entry; `len` when nothing is kept
    pub start: usize,
    /// Estimated cost of the kept entries and their gap markers
    pub tokens_used: usize,
    pub included: usize,
    pub dropped: usize,
}

/// Find the contiguous suffix of `entries` (oldest first) fitting `budget`.
pub fn select_window(
    entries: &[ConversationEntry],
    budget: usize,
    options: &HistoryOptions,
) -> HistoryWindow {
    let total = entries.len();
    let nothing = HistoryWindow {
        start: total,
        tokens_used: 0,
        included: 0,
        dropped: total,
    };
    if total == 0 || budget <= options.wrapper_overhead_tokens {
        return nothing;
    }

    let available = budget - options.wrapper_overhead_tokens;
    let gap_cost = time_gap_tokens(options.chars_per_token);
    let mut used = 0usize;
    let mut start = total;

    for i in (0..total).rev() {
        let mut cost = estimate_entry_tokens(&entries[i], options.chars_per_token);
        // The marker between this entry and the next newer one exists only
        // if both are kept, so it is charged with the older entry.
        if i + 1 < total && gap_between(&entries[i], &entries[i + 1], options.time_gap).is_some() {
            cost = cost.saturating_add(gap_cost);
        }
        // Cached counts come from upstream; a bogus one must not overflow.
        if used.saturating_add(cost) > available {
            break;
        }
        used += cost;
        start = i;
    }

    HistoryWindow {
        start,
        tokens_used: used,
        included: total - start,
        dropped: start,
    }
}

/// Selected and serialized current-channel history.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HistorySelection {
    /// Rendered `<message>` lines, oldest first
    #[serde(skip)]
    pub markup: String,
    pub budget: usize,
    pub tokens_used: usize,
    pub included: usize,
    pub dropped: usize,
    /// Ids of the kept entries
    #[serde(skip)]
    pub included_ids: HashSet<EntryId>,
}

/// Select the current channel's history and render it.
pub fn select_history(
    ctx: &RequestContext,
    entries: &[ConversationEntry],
    budget: usize,
    names: &SpeakerNames,
    options: &HistoryOptions,
) -> HistorySelection {
    let window = select_window(entries, budget, options);
    let kept = &entries[window.start..];
    let included_ids: HashSet<EntryId> = kept.iter().map(|e| e.id.clone()).collect();

    let markup = if kept.is_empty() {
        String::new()
    } else {
        HistoryRenderer::new(ctx, names, &included_ids, options.time_gap).render_entries(kept)
    };

    debug!(
        included = window.included,
        dropped = window.dropped,
        tokens = window.tokens_used,
        budget,
        "History selection complete"
    );

    HistorySelection {
        markup,
        budget,
        tokens_used: window.tokens_used,
        included: window.included,
        dropped: window.dropped,
        included_ids,
    }
}
