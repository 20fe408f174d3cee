//! Budget calculators.
//!
//! Pure saturating arithmetic. A budget is never negative; zero is a valid
//! budget that means "include nothing".
//!
//! The two variable budgets are computed in strict sequence: memories first
//! (the system prompt embeds them), then history, after the prompt with
//! memories has been re-measured.

use chorus_core::ConversationEntry;
use serde::{Deserialize, Serialize};

use crate::serialize::estimate_entry_tokens;

/// `window - sum(fixed)`, clamped at zero.
pub fn remaining_budget(window: usize, fixed: &[usize]) -> usize {
    fixed
        .iter()
        .fold(window, |left, used| left.saturating_sub(*used))
}

/// Tokens available to memories.
pub fn calculate_memory_budget(
    window: usize,
    base_system_prompt: usize,
    current_message: usize,
    history_estimate: usize,
) -> usize {
    remaining_budget(window, &[base_system_prompt, current_message, history_estimate])
}

/// Tokens available to history.
///
/// The orchestrator passes the re-measured prompt (memories already inlined)
/// as `system_prompt` and `memory_tokens = 0`; callers holding the parts
/// separately may pass them apart.
pub fn calculate_history_budget(
    window: usize,
    system_prompt: usize,
    current_message: usize,
    memory_tokens: usize,
) -> usize {
    remaining_budget(window, &[system_prompt, current_message, memory_tokens])
}

/// Shrink a budget by `percent` (clamped to 0..=100), rounding down.
///
/// Applied after the nominal history budget is computed, so that retries
/// of the same turn produce differently shaped prompts.
pub fn apply_reduction(budget: usize, percent: u8) -> usize {
    let keep = 100 - usize::from(percent.min(100));
    budget.saturating_mul(keep) / 100
}

/// Approximate cost of the full current-channel history, capped at
/// `window * reserve_ratio`. Held back while sizing memories so a long
/// history cannot be starved by them, and a huge one cannot starve them.
pub fn estimate_history_reservation(
    entries: &[ConversationEntry],
    window: usize,
    reserve_ratio: f32,
    chars_per_token: usize,
) -> usize {
    let cap = (window as f64 * f64::from(reserve_ratio.clamp(0.0, 1.0))) as usize;
    let mut total = 0usize;
    for entry in entries {
        total = total.saturating_add(estimate_entry_tokens(entry, chars_per_token));
        if total >= cap {
            return cap;
        }
    }
    total
}

// ── Token budget ──────────────────────────────────────────────────────────

/// How the window was spent on one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudget {
    pub context_window_tokens: usize,
    /// Memory-free base system prompt
    pub system_prompt_tokens: usize,
    pub current_message_tokens: usize,
    pub memory_budget: usize,
    pub memory_tokens_used: usize,
    /// After any reduction
    pub history_budget: usize,
    /// Current channel only (estimated)
    pub history_tokens_used: usize,
    /// Cross-channel content, measured with the tokenizer
    pub cross_channel_tokens_used: usize,
    /// Final system prompt, measured with the tokenizer
    pub final_prompt_tokens: usize,
}

impl TokenBudget {
    /// Sum of the components the window invariant constrains.
    pub fn accounted_tokens(&self) -> usize {
        self.system_prompt_tokens
            + self.current_message_tokens
            + self.memory_tokens_used
            + self.history_tokens_used
    }

    /// Whether the budget invariant holds, ignoring cross-channel tolerance.
    pub fn within_window(&self) -> bool {
        self.accounted_tokens() <= self.context_window_tokens
    }

    /// Percentage of the window used by the final prompt and current turn.
    pub fn utilization_pct(&self) -> f32 {
        if self.context_window_tokens == 0 {
            return 0.0;
        }
        let used = self.final_prompt_tokens + self.current_message_tokens;
        (used as f32 / self.context_window_tokens as f32) * 100.0
    }
}
