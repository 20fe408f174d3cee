//! Data model for diagnostic records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ── Stage ─────────────────────────────────────────────────────────────────

/// A step of the assembly pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Memory-free base system prompt measured.
    BasePrompt,
    /// Memory budget computed.
    MemoryBudget,
    /// Memories selected.
    MemorySelection,
    /// History budget computed (after reduction).
    HistoryBudget,
    /// Current-channel history selected.
    HistorySelection,
    /// Cross-channel history selected and measured.
    CrossChannel,
    /// Final prompt assembled.
    FinalPrompt,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BasePrompt => write!(f, "base_prompt"),
            Self::MemoryBudget => write!(f, "memory_budget"),
            Self::MemorySelection => write!(f, "memory_selection"),
            Self::HistoryBudget => write!(f, "history_budget"),
            Self::HistorySelection => write!(f, "history_selection"),
            Self::CrossChannel => write!(f, "cross_channel"),
            Self::FinalPrompt => write!(f, "final_prompt"),
        }
    }
}

/// A recorded scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl StageValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<usize> for StageValue {
    fn from(v: usize) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<i64> for StageValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for StageValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for StageValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for StageValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for StageValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Values captured at one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub values: BTreeMap<String, StageValue>,
}

impl StageRecord {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            recorded_at: Utc::now(),
            values: BTreeMap::new(),
        }
    }

    /// Attach a named value.
    pub fn with(mut self, key: &str, value: impl Into<StageValue>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&StageValue> {
        self.values.get(key)
    }
}

// ── Record ────────────────────────────────────────────────────────────────

/// Everything captured about one prompt assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    /// Unique identifier.
    pub id: String,
    /// The request nonce the prompt was built with.
    pub request_id: String,
    /// Personality the prompt was built for.
    pub personality: String,
    /// When assembly started.
    pub started_at: DateTime<Utc>,
    /// When assembly finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Stage values, in pipeline order.
    #[serde(default)]
    pub stages: Vec<StageRecord>,
    /// The final system prompt, for replay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// The human-turn message sent alongside it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_message: Option<String>,
}

impl DiagnosticRecord {
    pub fn new(request_id: impl Into<String>, personality: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_id: request_id.into(),
            personality: personality.into(),
            started_at: Utc::now(),
            ended_at: None,
            stages: Vec::new(),
            system_prompt: None,
            human_message: None,
        }
    }

    pub fn push(&mut self, stage: StageRecord) {
        self.stages.push(stage);
    }

    /// Mark the record as finished, capturing the produced prompt.
    pub fn finish(&mut self, system_prompt: &str, human_message: &str) {
        self.ended_at = Some(Utc::now());
        self.system_prompt = Some(system_prompt.to_string());
        self.human_message = Some(human_message.to_string());
    }

    /// The first record for a stage.
    pub fn stage(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Shortcut for an integer value at a stage.
    pub fn int(&self, stage: Stage, key: &str) -> Option<i64> {
        self.stage(stage)?.get(key)?.as_int()
    }

    /// Wall-clock duration in milliseconds, if finished.
    pub fn duration_ms(&self) -> Option<u64> {
        self.ended_at.map(|end| {
            end.signed_duration_since(self.started_at)
                .num_milliseconds()
                .max(0) as u64
        })
    }
}
