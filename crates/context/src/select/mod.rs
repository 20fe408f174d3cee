//! Budget-constrained selection of memories and history.

pub mod cross_channel;
pub mod history;
pub mod memory;

use std::collections::HashSet;

use chorus_core::{ConversationEntry, CrossChannelGroup, EntryId, TokenCounter, TokenizerError};

use crate::request::RequestContext;
use crate::serialize::SpeakerNames;

pub use cross_channel::{CrossChannelOptions, CrossChannelSelection, select_cross_channel};
pub use history::{HistoryOptions, HistorySelection, HistoryWindow, select_history, select_window};
pub use memory::{MemorySelection, select_memories};

/// Current-channel history plus optional cross-channel history.
#[derive(Debug, Clone, Default)]
pub struct HistoryOutcome {
    pub current: HistorySelection,
    pub cross_channel: Option<CrossChannelSelection>,
}

impl HistoryOutcome {
    /// Chat log body: cross-channel first, current channel second.
    pub fn markup(&self) -> String {
        let cross = self
            .cross_channel
            .as_ref()
            .map(|c| c.markup.as_str())
            .unwrap_or_default();
        match (cross.is_empty(), self.current.markup.is_empty()) {
            (true, _) => self.current.markup.clone(),
            (false, true) => cross.to_string(),
            (false, false) => format!("{}\n{}", cross, self.current.markup),
        }
    }

    /// Ids of current-channel entries in the chat log.
    pub fn included_ids(&self) -> &HashSet<EntryId> {
        &self.current.included_ids
    }

    pub fn cross_channel_tokens(&self) -> usize {
        self.cross_channel
            .as_ref()
            .map_or(0, |c| c.measured_tokens)
    }
}

/// Select the current channel, then give what is left to other channels.
///
/// The chat log wrapper is reserved once from `budget` and shared by both.
pub fn select_all_history(
    ctx: &RequestContext,
    current: &[ConversationEntry],
    groups: &[CrossChannelGroup],
    budget: usize,
    names: &SpeakerNames,
    options: &CrossChannelOptions,
    counter: &dyn TokenCounter,
) -> Result<HistoryOutcome, TokenizerError> {
    let current = select_history(ctx, current, budget, names, &options.history);

    let cross_channel = if groups.is_empty() {
        None
    } else {
        let left = budget.saturating_sub(options.history.wrapper_overhead_tokens + current.tokens_used);
        Some(select_cross_channel(
            ctx,
            groups,
            left,
            names,
            &current.included_ids,
            options,
            counter,
        )?)
    };

    Ok(HistoryOutcome {
        current,
        cross_channel,
    })
}
