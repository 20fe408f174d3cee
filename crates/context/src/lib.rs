//! # Chorus Context
//!
//! The context & prompt budget engine. Given a model context window, a
//! tokenizer, the conversation history, and ranked memory candidates, it
//! decides what fits and renders it as a structured system prompt.
//!
//! ## Pipeline
//!
//! ```text
//! CurrentTurn ──► HumanMessage ─┐
//!                               ├─► base prompt ─► memory budget ─► memories
//! RequestContext ───────────────┘                                     │
//!                       history budget ◄─ re-measure ◄─ prompt + memories
//!                             │
//!                             ▼
//!              current channel ─► cross-channel ─► final prompt
//! ```
//!
//! Budgets are computed in strict sequence, never negative, and a zero
//! budget is a valid outcome. Every user-supplied string is escaped before
//! it enters the markup.

pub mod assembler;
pub mod budget;
pub mod markup;
pub mod rag;
pub mod request;
pub mod select;
pub mod serialize;
pub mod time;
pub mod turn;

pub use assembler::{AssembledPrompt, PromptBuilder, PromptParts, Section, build_system_prompt};
pub use budget::{
    TokenBudget, apply_reduction, calculate_history_budget, calculate_memory_budget,
    remaining_budget,
};
pub use rag::{ContextRequest, PreparedContext, RagService};
pub use request::{EngineOptions, Location, RequestContext};
pub use select::{
    CrossChannelSelection, HistoryOutcome, HistorySelection, MemorySelection, select_all_history,
    select_cross_channel, select_history, select_memories,
};
pub use serialize::{HistoryRenderer, SpeakerNames};
pub use turn::{
    AttachmentDescription, AttachmentKind, CurrentTurn, HumanMessage, build_human_message,
    inject_image_descriptions,
};
