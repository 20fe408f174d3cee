//! Memory selection: greedy, rank order, skip-and-continue.

use chorus_core::{MemoryDocument, TokenCounter, TokenizerError};
use serde::Serialize;
use tracing::{debug, warn};

use crate::request::RequestContext;
use crate::serialize::{MEMORY_SEPARATOR, render_memory_line};

/// Outcome of memory selection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemorySelection {
    /// Accepted documents, in rank order
    pub selected: Vec<MemoryDocument>,
    /// Their rendered archive lines, parallel to `selected`
    #[serde(skip)]
    pub lines: Vec<String>,
    /// Lines, separators and archive overhead; zero when nothing is selected
    pub tokens_used: usize,
    pub budget: usize,
    /// Fixed cost of the archive wrapper, charged once
    pub overhead: usize,
    pub dropped: usize,
    /// Dropped items whose own cost exceeds the whole budget
    pub oversized: usize,
}

impl MemorySelection {
    pub fn considered(&self) -> usize {
        self.selected.len() + self.dropped
    }
}

/// Fit ranked memories into `budget`.
///
/// `overhead` is what an archive holding a single empty line adds to the
/// prompt. It is charged with the first accepted memory; every later one
/// also pays for its separator. Each candidate's exact archive line is
/// measured with `counter`. A candidate that does not fit the remaining
/// budget is skipped, and smaller lower-ranked ones are still considered.
pub fn select_memories(
    ctx: &RequestContext,
    candidates: &[MemoryDocument],
    budget: usize,
    overhead: usize,
    counter: &dyn TokenCounter,
) -> Result<MemorySelection, TokenizerError> {
    let mut selection = MemorySelection {
        budget,
        overhead,
        ..Default::default()
    };

    if budget <= overhead {
        selection.dropped = candidates.len();
        if !candidates.is_empty() {
            debug!(budget, overhead, "Memory budget does not cover the archive");
        }
        return Ok(selection);
    }

    let separator = counter.count(MEMORY_SEPARATOR)?;

    for memory in candidates {
        let line = render_memory_line(ctx, memory);
        let cost = counter.count(&line)?;

        if overhead.saturating_add(cost) > budget {
            selection.dropped += 1;
            selection.oversized += 1;
            continue;
        }

        let fixed = if selection.selected.is_empty() {
            overhead
        } else {
            separator
        };
        let charge = fixed.saturating_add(cost);
        if selection.tokens_used.saturating_add(charge) > budget {
            selection.dropped += 1;
            continue;
        }

        selection.tokens_used += charge;
        selection.selected.push(memory.clone());
        selection.lines.push(line);
    }

    if selection.oversized > 0 {
        warn!(
            oversized = selection.oversized,
            budget, "Memories larger than the whole memory budget were dropped"
        );
    }
    debug!(
        selected = selection.selected.len(),
        dropped = selection.dropped,
        tokens = selection.tokens_used,
        budget,
        "Memory selection complete"
    );

    Ok(selection)
}
