//! Personas: the active personality and the other conversation participants.
//!
//! Both come from an external persona directory; the engine only reads
//! names, handles, and descriptions off them.

use serde::{Deserialize, Serialize};

/// The AI personality the prompt is being assembled for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Personality {
    /// Stable id
    pub id: String,

    /// The name the personality answers to
    pub name: String,

    /// Character / persona description (free text)
    #[serde(default)]
    pub description: String,

    /// Personality-specific behavior protocol, overriding the configured one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior_protocol: Option<String>,

    /// Model context window for this personality, overriding the configured one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window_tokens: Option<usize>,
}

impl Personality {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            behavior_protocol: None,
            context_window_tokens: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Whether a participant is a human persona or another AI personality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantKind {
    #[default]
    User,
    Personality,
}

/// Another active participant in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    /// Persona or personality id
    pub id: String,

    /// Display name
    pub display_name: String,

    /// Unique platform handle (users only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,

    /// Optional description the persona supplied about themselves
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub kind: ParticipantKind,
}

impl Participant {
    pub fn user(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            handle: None,
            description: None,
            kind: ParticipantKind::User,
        }
    }

    pub fn personality(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            kind: ParticipantKind::Personality,
            ..Self::user(id, display_name)
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_kinds() {
        let user = Participant::user("p1", "Bob").with_handle("bobby");
        let bot = Participant::personality("lila", "Lila");
        assert_eq!(user.kind, ParticipantKind::User);
        assert_eq!(user.handle.as_deref(), Some("bobby"));
        assert_eq!(bot.kind, ParticipantKind::Personality);
    }

    #[test]
    fn personality_deserializes_with_defaults() {
        let p: Personality = serde_json::from_str(r#"{"id":"lila","name":"Lila"}"#).unwrap();
        assert!(p.description.is_empty());
        assert!(p.context_window_tokens.is_none());
    }
}
