//! The current turn: the human message and attachment descriptions.

use chorus_core::{ConversationEntry, EntryExtra, EntryId, ImageDescription, QuotedMessage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::markup::Element;

/// Kind of attachment an external processor described.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Audio,
    File,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::File => "file",
        }
    }
}

/// A resolved description (vision caption, transcript) of an attachment on
/// the current message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentDescription {
    pub kind: AttachmentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub description: String,
}

/// What the user just sent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrentTurn {
    /// Message text as typed
    pub content: String,
    /// Persona the user is speaking through
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentDescription>,
    /// Messages the user replied to or linked
    #[serde(default)]
    pub references: Vec<QuotedMessage>,
}

impl CurrentTurn {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_attachment(mut self, attachment: AttachmentDescription) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_reference(mut self, reference: QuotedMessage) -> Self {
        self.references.push(reference);
        self
    }
}

/// The human-turn message sent next to the system prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanMessage {
    /// What the model receives
    pub content: String,
    /// The text before attachment and reference notes were appended; this is
    /// what gets persisted
    pub plain_content: String,
    /// Ids of referenced messages, in reference order
    pub reference_ids: Vec<EntryId>,
}

/// Build the human message: user text, then attachment descriptions, then a
/// pointer to the referenced messages (whose content lives in the system
/// prompt).
pub fn build_human_message(turn: &CurrentTurn) -> HumanMessage {
    let mut parts = vec![turn.content.clone()];

    if !turn.attachments.is_empty() {
        let mut el = Element::new("attachments");
        for attachment in &turn.attachments {
            el = el.child(
                Element::new("attachment")
                    .attr("type", attachment.kind.as_str())
                    .attr_opt("name", attachment.name.as_deref())
                    .text(&attachment.description)
                    .render(),
            );
        }
        parts.push(el.render());
    }

    let mut reference_ids: Vec<EntryId> = Vec::new();
    let mut refs = Element::new("references");
    for reference in &turn.references {
        if reference_ids.contains(&reference.id) {
            continue;
        }
        reference_ids.push(reference.id.clone());
        refs = refs.child(
            Element::new("reference")
                .attr("id", reference.id.as_str())
                .attr("from", &reference.author)
                .render(),
        );
    }
    if !reference_ids.is_empty() {
        parts.push(refs.render());
    }

    HumanMessage {
        content: parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"),
        plain_content: turn.content.clone(),
        reference_ids,
    }
}

/// Attach image descriptions to the entries owning their transport ids.
///
/// Runs once per request before anything is measured. Descriptions already
/// present on an entry are not added twice. Returns how many were attached.
pub fn inject_image_descriptions(
    entries: &mut [ConversationEntry],
    descriptions: &[ImageDescription],
) -> usize {
    let mut injected = 0;
    for description in descriptions {
        let Some(entry) = entries
            .iter_mut()
            .find(|e| e.has_transport_id(&description.transport_id))
        else {
            debug!(transport_id = %description.transport_id, "No entry for image description");
            continue;
        };

        let extra = EntryExtra::Image(description.clone());
        if entry.extras.contains(&extra) {
            continue;
        }
        entry.extras.push(extra);
        // The upstream count no longer covers the entry.
        entry.token_count = None;
        injected += 1;
    }
    injected
}
