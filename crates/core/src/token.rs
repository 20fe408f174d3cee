//! Token counting: the tokenizer seam.
//!
//! The engine measures text through [`TokenCounter`] and never tokenizes on
//! its own. Implementations must be pure and reentrant: one counter is shared
//! by every in-flight request.
//!
//! Two implementations ship with the crate:
//! - [`HeuristicCounter`]: ~4 characters per token, always available
//! - `HfTokenCounter`: HuggingFace `tokenizers`, behind `hf-tokenizer`

use crate::error::TokenizerError;

/// Counts tokens for a piece of text.
pub trait TokenCounter: Send + Sync {
    /// Counter name for diagnostics (e.g. "heuristic", "hf:cl100k").
    fn name(&self) -> &str;

    /// Count the tokens in `text`.
    fn count(&self, text: &str) -> Result<usize, TokenizerError>;
}

/// Character-based estimate: 1 token ≈ `chars_per_token` bytes, rounded up.
///
/// Accurate within ~10% for BPE tokenizers on English text.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicCounter {
    chars_per_token: usize,
}

impl HeuristicCounter {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }

    /// Infallible estimate, usable where a `Result` is inconvenient.
    pub fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        text.len().div_ceil(self.chars_per_token)
    }
}

impl Default for HeuristicCounter {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenCounter for HeuristicCounter {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn count(&self, text: &str) -> Result<usize, TokenizerError> {
        Ok(self.estimate(text))
    }
}

#[cfg(feature = "hf-tokenizer")]
mod hf {
    use super::{TokenCounter, TokenizerError};
    use std::path::Path;
    use tokenizers::Tokenizer;

    /// Exact counts from a HuggingFace `tokenizer.json`.
    pub struct HfTokenCounter {
        name: String,
        tokenizer: Tokenizer,
    }

    impl HfTokenCounter {
        /// Load a tokenizer definition from disk.
        pub fn from_file(path: &Path) -> Result<Self, TokenizerError> {
            let tokenizer = Tokenizer::from_file(path).map_err(|e| {
                TokenizerError::NotLoaded(format!("{}: {}", path.display(), e))
            })?;
            let stem = path
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .unwrap_or("tokenizer");
            tracing::debug!(path = %path.display(), "Loaded tokenizer");
            Ok(Self {
                name: format!("hf:{}", stem),
                tokenizer,
            })
        }
    }

    impl TokenCounter for HfTokenCounter {
        fn name(&self) -> &str {
            &self.name
        }

        fn count(&self, text: &str) -> Result<usize, TokenizerError> {
            if text.is_empty() {
                return Ok(0);
            }
            self.tokenizer
                .encode(text, false)
                .map(|enc| enc.len())
                .map_err(|e| TokenizerError::EncodingFailed(e.to_string()))
        }
    }
}

#[cfg(feature = "hf-tokenizer")]
pub use hf::HfTokenCounter;
