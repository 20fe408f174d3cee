//! Conversation entry domain types.
//!
//! A [`ConversationEntry`] is one logical message in a channel's history.
//! Upstream collaborators hand the engine [`RawEntry`] records (stringly
//! roles, optional fields); they are normalized exactly once, here, into
//! tagged variants so the serializer can match exhaustively.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::EntryError;

/// Stable identifier for a logical conversation entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub String);

impl EntryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of an entry's speaker.
///
/// Closed set: anything other than `user` / `assistant` (in any casing) is
/// rejected at the ingestion boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Role {
    /// A human participant (through one of their personas)
    User,
    /// An AI personality
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(other.to_string()),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who produced an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Speaker {
    /// A user speaking through one of their personas.
    User {
        persona_id: String,
        display_name: String,
        /// Unique platform handle, used to disambiguate colliding names.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        handle: Option<String>,
    },
    /// An AI personality.
    Assistant { personality_name: String },
}

impl Speaker {
    pub fn role(&self) -> Role {
        match self {
            Self::User { .. } => Role::User,
            Self::Assistant { .. } => Role::Assistant,
        }
    }

    /// The undecorated display name.
    pub fn display_name(&self) -> &str {
        match self {
            Self::User { display_name, .. } => display_name,
            Self::Assistant { personality_name } => personality_name,
        }
    }
}

/// How the entry arrived in the channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Typed directly by the speaker
    #[default]
    Plain,
    /// Forwarded from elsewhere; the speaker is the forwarder, not the author
    Forwarded,
}

/// A message referenced or quoted by another entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotedMessage {
    /// Stable id of the quoted entry (used for deduplication)
    pub id: EntryId,
    /// Display name of the quoted author
    pub author: String,
    /// Role of the quoted author
    pub role: Role,
    /// Quoted text
    pub content: String,
    /// When the quoted message was written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A textual description of an image attachment, produced by an external
/// vision collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescription {
    /// Transport-level message id the attachment belonged to
    pub transport_id: String,
    /// The description text
    pub description: String,
}

/// Structured material attached to an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryExtra {
    Quote(QuotedMessage),
    Image(ImageDescription),
}

/// One logical message in a channel's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// Stable id
    pub id: EntryId,

    /// Transport-level message ids (a long reply may span several)
    pub transport_ids: Vec<String>,

    /// Who said it
    pub speaker: Speaker,

    /// The text content
    pub content: String,

    /// When it was written
    pub created_at: DateTime<Utc>,

    /// Plain or forwarded
    #[serde(default)]
    pub kind: EntryKind,

    /// Quotes and image descriptions, in attachment order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<EntryExtra>,

    /// Token count cached by an upstream collaborator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
}

impl ConversationEntry {
    /// Create a plain user entry.
    pub fn user(
        id: impl Into<String>,
        persona_id: impl Into<String>,
        display_name: impl Into<String>,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let id = id.into();
        Self {
            transport_ids: vec![id.clone()],
            id: EntryId(id),
            speaker: Speaker::User {
                persona_id: persona_id.into(),
                display_name: display_name.into(),
                handle: None,
            },
            content: content.into(),
            created_at,
            kind: EntryKind::Plain,
            extras: Vec::new(),
            token_count: None,
        }
    }

    /// Create a plain assistant entry.
    pub fn assistant(
        id: impl Into<String>,
        personality_name: impl Into<String>,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let id = id.into();
        Self {
            transport_ids: vec![id.clone()],
            id: EntryId(id),
            speaker: Speaker::Assistant {
                personality_name: personality_name.into(),
            },
            content: content.into(),
            created_at,
            kind: EntryKind::Plain,
            extras: Vec::new(),
            token_count: None,
        }
    }

    /// Set the user handle (no-op on assistant entries).
    pub fn with_handle(mut self, new_handle: impl Into<String>) -> Self {
        if let Speaker::User { handle, .. } = &mut self.speaker {
            *handle = Some(new_handle.into());
        }
        self
    }

    pub fn with_quote(mut self, quote: QuotedMessage) -> Self {
        self.extras.push(EntryExtra::Quote(quote));
        self
    }

    pub fn with_token_count(mut self, tokens: usize) -> Self {
        self.token_count = Some(tokens);
        self
    }

    pub fn with_transport_ids(mut self, ids: Vec<String>) -> Self {
        self.transport_ids = ids;
        self
    }

    pub fn forwarded(mut self) -> Self {
        self.kind = EntryKind::Forwarded;
        self
    }

    pub fn role(&self) -> Role {
        self.speaker.role()
    }

    /// Quoted messages attached to this entry.
    pub fn quotes(&self) -> impl Iterator<Item = &QuotedMessage> {
        self.extras.iter().filter_map(|e| match e {
            EntryExtra::Quote(q) => Some(q),
            EntryExtra::Image(_) => None,
        })
    }

    /// Image descriptions attached to this entry.
    pub fn images(&self) -> impl Iterator<Item = &ImageDescription> {
        self.extras.iter().filter_map(|e| match e {
            EntryExtra::Image(i) => Some(i),
            EntryExtra::Quote(_) => None,
        })
    }

    /// Whether this entry spans the given transport message id.
    pub fn has_transport_id(&self, transport_id: &str) -> bool {
        self.transport_ids.iter().any(|t| t == transport_id)
    }
}

/// The ingestion shape of an entry, as produced by upstream collaborators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub transport_ids: Vec<String>,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub persona_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub personality_name: Option<String>,
    #[serde(default)]
    pub forwarded: bool,
    #[serde(default)]
    pub quotes: Vec<QuotedMessage>,
    #[serde(default)]
    pub images: Vec<ImageDescription>,
    #[serde(default)]
    pub token_count: Option<usize>,
}

impl TryFrom<RawEntry> for ConversationEntry {
    type Error = EntryError;

    fn try_from(raw: RawEntry) -> Result<Self, Self::Error> {
        let id = raw
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or(EntryError::MissingId)?;

        let role: Role = raw.role.parse().map_err(|role| EntryError::UnknownRole {
            id: id.clone(),
            role,
        })?;

        let speaker = match role {
            Role::User => {
                let persona_id = raw
                    .persona_id
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| EntryError::MissingPersona { id: id.clone() })?;
                Speaker::User {
                    display_name: raw.display_name.unwrap_or_else(|| persona_id.clone()),
                    persona_id,
                    handle: raw.handle,
                }
            }
            Role::Assistant => Speaker::Assistant {
                personality_name: raw
                    .personality_name
                    .or(raw.display_name)
                    .unwrap_or_else(|| "Assistant".into()),
            },
        };

        let transport_ids = if raw.transport_ids.is_empty() {
            vec![id.clone()]
        } else {
            raw.transport_ids
        };

        let mut extras: Vec<EntryExtra> = raw.quotes.into_iter().map(EntryExtra::Quote).collect();
        extras.extend(raw.images.into_iter().map(EntryExtra::Image));

        Ok(Self {
            id: EntryId(id),
            transport_ids,
            speaker,
            content: raw.content,
            created_at: raw.created_at,
            kind: if raw.forwarded {
                EntryKind::Forwarded
            } else {
                EntryKind::Plain
            },
            extras,
            token_count: raw.token_count,
        })
    }
}

/// Normalize a batch of raw records, skipping malformed ones.
///
/// One bad historical record must not break a whole conversation, so
/// rejects are logged and dropped rather than failing the batch.
pub fn normalize_entries(raw: impl IntoIterator<Item = RawEntry>) -> Vec<ConversationEntry> {
    raw.into_iter()
        .filter_map(|r| match ConversationEntry::try_from(r) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping malformed conversation entry");
                None
            }
        })
        .collect()
}

/// History from a channel other than the one being answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossChannelGroup {
    /// Channel display name (e.g. `#general`)
    pub channel_name: String,
    /// Server / guild the channel belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    /// Entries, oldest first
    pub entries: Vec<ConversationEntry>,
}
