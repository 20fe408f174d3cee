//! Error types for the Chorus domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each collaborator boundary has its own error variant.
//!
//! Budget exhaustion is deliberately absent: a zero budget is a valid state
//! that yields empty prompt sections, never an error.

use thiserror::Error;

/// The top-level error type for all Chorus operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Tokenizer errors ---
    #[error("Tokenizer error: {0}")]
    Tokenizer(#[from] TokenizerError),

    // --- Memory retrieval errors ---
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- Input shape errors ---
    #[error("Entry error: {0}")]
    Entry(#[from] EntryError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// A tokenizer could not measure a piece of text.
///
/// Never handled locally: there is no safe fallback estimate on the
/// memory-selection path, so these propagate to the caller.
#[derive(Debug, Clone, Error)]
pub enum TokenizerError {
    #[error("Tokenizer not loaded: {0}")]
    NotLoaded(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),
}

/// The memory retrieval collaborator failed.
#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("Memory search failed: {0}")]
    SearchFailed(String),

    #[error("Memory store unavailable: {0}")]
    Unavailable(String),
}

/// A raw conversation record could not be turned into an entry.
///
/// These are skipped during normalization rather than aborting the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    #[error("Unknown role '{role}' on entry {id}")]
    UnknownRole { id: String, role: String },

    #[error("Entry is missing a stable id")]
    MissingId,

    #[error("User entry {id} has no persona id")]
    MissingPersona { id: String },
}
