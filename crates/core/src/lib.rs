//! # Chorus Core
//!
//! Domain types, collaborator traits, and error definitions for the Chorus
//! prompt budget engine. This crate has **no engine logic**; it defines the
//! value types that flow through a single prompt assembly and the seams
//! where external collaborators plug in.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here:
//! - [`TokenCounter`]: the tokenizer the engine measures with
//! - [`MemoryRetriever`]: the long-term memory search service
//!
//! Everything else (entries, memories, personas) is a plain value type. The
//! engine never owns a database connection or a network handle.

pub mod entry;
pub mod error;
pub mod memory;
pub mod persona;
pub mod token;

// Re-export key types at crate root for ergonomics
pub use entry::{
    ConversationEntry, CrossChannelGroup, EntryExtra, EntryId, EntryKind, ImageDescription,
    QuotedMessage, RawEntry, Role, Speaker, normalize_entries,
};
pub use error::{EntryError, Error, Result, RetrievalError, TokenizerError};
pub use memory::{MemoryDocument, MemoryMetadata, MemoryQuery, MemoryRetriever};
pub use persona::{Participant, ParticipantKind, Personality};
pub use token::{HeuristicCounter, TokenCounter};

#[cfg(feature = "hf-tokenizer")]
pub use token::HfTokenCounter;
