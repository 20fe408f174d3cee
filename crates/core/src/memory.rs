//! Memory trait: long-term memory candidates and their retrieval seam.
//!
//! The engine never searches memories itself. A retrieval collaborator
//! (vector similarity, hybrid search, whatever the host runs) returns
//! [`MemoryDocument`]s already ranked by relevance; the engine only decides
//! which of them fit the budget.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

/// Metadata attached to a retrieved memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMetadata {
    /// Unique ID for this memory
    pub id: String,

    /// Relevance score assigned by the retriever
    #[serde(default)]
    pub score: f32,

    /// When the memory was formed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A long-term memory candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryDocument {
    /// The content of the memory
    pub content: String,

    /// Id, score, timestamp
    pub metadata: MemoryMetadata,
}

impl MemoryDocument {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: MemoryMetadata {
                id: id.into(),
                score: 0.0,
                created_at: None,
            },
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.metadata.score = score;
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.metadata.created_at = Some(at);
        self
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }
}

/// A query for retrieving memories relevant to the current turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryQuery {
    /// The search text (usually the current user message)
    pub text: String,

    /// Personality whose memories are searched
    pub personality_id: String,

    /// Persona the memories were formed with, if scoped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<String>,

    /// Maximum number of results
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Minimum relevance score threshold
    #[serde(default)]
    pub min_score: f32,

    /// Entry ids already present in history; retrievers may skip memories
    /// formed from them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_entry_ids: Vec<String>,
}

fn default_limit() -> usize {
    15
}

impl MemoryQuery {
    pub fn new(text: impl Into<String>, personality_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            personality_id: personality_id.into(),
            persona_id: None,
            limit: default_limit(),
            min_score: 0.0,
            exclude_entry_ids: Vec::new(),
        }
    }
}

/// The retrieval collaborator.
///
/// Implementations must return documents sorted by relevance, best first.
#[async_trait]
pub trait MemoryRetriever: Send + Sync {
    /// The retriever name (e.g., "pgvector", "in_memory").
    fn name(&self) -> &str;

    /// Search memories by query.
    async fn retrieve(&self, query: &MemoryQuery) -> Result<Vec<MemoryDocument>, RetrievalError>;
}
