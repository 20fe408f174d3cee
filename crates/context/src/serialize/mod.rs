//! Structural serialization of history and memories into prompt markup.

pub mod history;
pub mod memory;
pub mod names;

pub use history::{
    HistoryRenderer, estimate_entry_chars, estimate_entry_tokens, gap_between, render_quote,
    render_time_gap, time_gap_tokens,
};
pub use memory::{MEMORY_SEPARATOR, render_memory_archive, render_memory_line};
pub use names::SpeakerNames;
