//! Speaker labels and name-collision disambiguation.
//!
//! A user persona that shares a name with an AI personality present in the
//! conversation is always rendered with its unique handle, so the model can
//! never read their messages as its own.

use std::borrow::Cow;
use std::collections::HashSet;

use chorus_core::{ConversationEntry, Participant, ParticipantKind, Speaker};

/// Lowercased AI names known for one request.
#[derive(Debug, Clone)]
pub struct SpeakerNames {
    personality_name: String,
    ai_names: HashSet<String>,
}

impl SpeakerNames {
    /// Collect AI names from the active personality, assistant entries, and
    /// personality participants.
    pub fn collect<'a>(
        personality_name: &str,
        entries: impl IntoIterator<Item = &'a ConversationEntry>,
        participants: &[Participant],
    ) -> Self {
        let mut ai_names = HashSet::new();
        ai_names.insert(personality_name.to_lowercase());

        for entry in entries {
            if let Speaker::Assistant { personality_name } = &entry.speaker {
                ai_names.insert(personality_name.to_lowercase());
            }
        }
        for p in participants {
            if p.kind == ParticipantKind::Personality {
                ai_names.insert(p.display_name.to_lowercase());
            }
        }

        Self {
            personality_name: personality_name.to_string(),
            ai_names,
        }
    }

    pub fn personality_name(&self) -> &str {
        &self.personality_name
    }

    /// Whether a user display name collides with any AI name.
    pub fn collides(&self, display_name: &str) -> bool {
        self.ai_names.contains(&display_name.to_lowercase())
    }

    /// Whether the name collides with the active personality specifically.
    pub fn collides_with_self(&self, display_name: &str) -> bool {
        display_name.to_lowercase() == self.personality_name.to_lowercase()
    }

    /// Label for a user persona: `Name (@handle)` on collision, else `Name`.
    /// Falls back to the persona id when there is no handle.
    pub fn user_label<'a>(
        &self,
        display_name: &'a str,
        handle: Option<&str>,
        persona_id: &str,
    ) -> Cow<'a, str> {
        if !self.collides(display_name) {
            return Cow::Borrowed(display_name);
        }
        let tag = handle.filter(|h| !h.is_empty()).unwrap_or(persona_id);
        Cow::Owned(format!("{display_name} (@{tag})"))
    }

    pub fn speaker_label<'a>(&self, speaker: &'a Speaker) -> Cow<'a, str> {
        match speaker {
            Speaker::User {
                persona_id,
                display_name,
                handle,
            } => self.user_label(display_name, handle.as_deref(), persona_id),
            Speaker::Assistant { personality_name } => Cow::Borrowed(personality_name.as_str()),
        }
    }

    /// Labels of user personas sharing the active personality's name, from
    /// participants and history speakers, first-seen order, deduplicated.
    pub fn self_collisions<'a>(
        &self,
        participants: &[Participant],
        entries: impl IntoIterator<Item = &'a ConversationEntry>,
    ) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        let mut push = |label: String| {
            if !labels.contains(&label) {
                labels.push(label);
            }
        };

        for p in participants {
            if p.kind == ParticipantKind::User && self.collides_with_self(&p.display_name) {
                push(self.participant_label(p).into_owned());
            }
        }
        for entry in entries {
            if let Speaker::User { display_name, .. } = &entry.speaker {
                if self.collides_with_self(display_name) {
                    push(self.speaker_label(&entry.speaker).into_owned());
                }
            }
        }
        labels
    }

    pub fn participant_label<'a>(&self, participant: &'a Participant) -> Cow<'a, str> {
        match participant.kind {
            ParticipantKind::User => self.user_label(
                &participant.display_name,
                participant.handle.as_deref(),
                &participant.id,
            ),
            ParticipantKind::Personality => Cow::Borrowed(participant.display_name.as_str()),
        }
    }
}
