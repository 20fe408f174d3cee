//! Prompt assembly: fixed section order over named fragments.
//!
//! The system prompt is built from ten sections, always in this order:
//!
//! 1. **Identity**: who the personality is
//! 2. **Identity constraints**: users sharing the personality's name
//! 3. **Platform constraints**: fixed legal/platform rules
//! 4. **Context**: current time, location, request nonce
//! 5. **Participants**: everyone else in the conversation
//! 6. **Memory archive**: selected long-term memories
//! 7. **Referenced messages**: what the current turn points at
//! 8. **Chat log**: selected history
//! 9. **Behavior protocol**: personality/user-configurable rules
//! 10. **Output constraints**: fixed output-format rules
//!
//! Constraints sit at both ends where attention is strongest; archival
//! material sits in the middle. Reordering changes model behavior.
//!
//! Assembly is pure string composition and cannot fail. Identical inputs
//! produce identical output.

use std::collections::HashSet;

use chorus_core::{EntryId, Participant, ParticipantKind, QuotedMessage};
use serde::Serialize;
use tracing::debug;

use crate::markup::{Element, block, escape_xml};
use crate::request::{EngineOptions, RequestContext};
use crate::serialize::{SpeakerNames, render_quote};
use crate::time::format_current_time;

// ── Sections ──────────────────────────────────────────────────────────────

/// A named section of the system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Identity,
    IdentityConstraints,
    PlatformConstraints,
    Context,
    Participants,
    MemoryArchive,
    ReferencedMessages,
    ChatLog,
    BehaviorProtocol,
    OutputConstraints,
}

impl Section {
    /// The one and only section order.
    pub const ORDER: [Section; 10] = [
        Section::Identity,
        Section::IdentityConstraints,
        Section::PlatformConstraints,
        Section::Context,
        Section::Participants,
        Section::MemoryArchive,
        Section::ReferencedMessages,
        Section::ChatLog,
        Section::BehaviorProtocol,
        Section::OutputConstraints,
    ];

    /// Wrapping element name.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::IdentityConstraints => "identity_constraints",
            Self::PlatformConstraints => "platform_constraints",
            Self::Context => "context",
            Self::Participants => "participants",
            Self::MemoryArchive => "memory_archive",
            Self::ReferencedMessages => "referenced_messages",
            Self::ChatLog => "chat_log",
            Self::BehaviorProtocol => "protocol",
            Self::OutputConstraints => "output_constraints",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Length of one non-empty section in the assembled prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SectionLength {
    pub section: Section,
    pub chars: usize,
}

/// The assembled system prompt.
#[derive(Debug, Clone, Serialize)]
pub struct AssembledPrompt {
    pub text: String,
    /// Non-empty sections, in prompt order
    pub sections: Vec<SectionLength>,
}

impl AssembledPrompt {
    pub fn section_chars(&self, section: Section) -> Option<usize> {
        self.sections
            .iter()
            .find(|s| s.section == section)
            .map(|s| s.chars)
    }
}

/// Ordered slots of already-rendered fragments.
///
/// Fragments can be set in any order; [`PromptBuilder::build`] always emits
/// them in [`Section::ORDER`], skipping empty ones.
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    fragments: [String; 10],
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, section: Section, fragment: String) -> &mut Self {
        self.fragments[section.index()] = fragment;
        self
    }

    pub fn with(mut self, section: Section, fragment: String) -> Self {
        self.set(section, fragment);
        self
    }

    pub fn get(&self, section: Section) -> &str {
        &self.fragments[section.index()]
    }

    pub fn build(&self) -> AssembledPrompt {
        let mut parts: Vec<&str> = Vec::with_capacity(Section::ORDER.len());
        let mut sections = Vec::with_capacity(Section::ORDER.len());

        for section in Section::ORDER {
            let fragment = self.get(section);
            if fragment.is_empty() {
                continue;
            }
            debug!(section = %section, chars = fragment.len(), "Prompt section");
            sections.push(SectionLength {
                section,
                chars: fragment.len(),
            });
            parts.push(fragment);
        }

        let text = parts.join("\n\n");
        debug!(sections = sections.len(), chars = text.len(), "System prompt assembled");
        AssembledPrompt { text, sections }
    }
}

// ── Section rendering ─────────────────────────────────────────────────────

/// Everything the system prompt is rendered from.
pub struct PromptParts<'a> {
    pub ctx: &'a RequestContext,
    pub options: &'a EngineOptions,
    pub names: &'a SpeakerNames,
    pub participants: &'a [Participant],
    /// User labels that collide with the personality's own name
    pub self_collisions: &'a [String],
    /// Messages referenced by the current turn
    pub references: &'a [QuotedMessage],
    /// Rendered `<memory_archive>` block, or empty
    pub memory_archive: &'a str,
    /// Chat log body (cross-channel then current channel), or empty
    pub chat_log: &'a str,
    /// Ids of entries in the chat log
    pub included_ids: &'a HashSet<EntryId>,
}

/// Render every section and assemble them in order.
pub fn build_system_prompt(parts: &PromptParts<'_>) -> AssembledPrompt {
    PromptBuilder::new()
        .with(Section::Identity, render_identity(parts.ctx))
        .with(
            Section::IdentityConstraints,
            render_identity_constraints(parts.ctx, parts.self_collisions),
        )
        .with(
            Section::PlatformConstraints,
            text_block(Section::PlatformConstraints, &parts.options.platform_constraints),
        )
        .with(Section::Context, render_context(parts.ctx))
        .with(
            Section::Participants,
            render_participants(parts.ctx, parts.names, parts.participants),
        )
        .with(Section::MemoryArchive, parts.memory_archive.to_string())
        .with(
            Section::ReferencedMessages,
            render_references(parts.ctx, parts.references, parts.included_ids),
        )
        .with(Section::ChatLog, block(Section::ChatLog.tag(), parts.chat_log))
        .with(
            Section::BehaviorProtocol,
            text_block(
                Section::BehaviorProtocol,
                parts
                    .ctx
                    .personality
                    .behavior_protocol
                    .as_deref()
                    .unwrap_or(&parts.options.behavior_protocol),
            ),
        )
        .with(
            Section::OutputConstraints,
            text_block(Section::OutputConstraints, &parts.options.output_constraints),
        )
        .build()
}

fn text_block(section: Section, text: &str) -> String {
    block(section.tag(), escape_xml(text.trim()).as_ref())
}

fn render_identity(ctx: &RequestContext) -> String {
    let personality = &ctx.personality;
    let mut el = Element::new("identity").text(&format!("You are {}.", personality.name));
    let description = personality.description.trim();
    if !description.is_empty() {
        el = el.child(Element::new("persona").text(description).render());
    }
    el.render()
}

fn render_identity_constraints(ctx: &RequestContext, collisions: &[String]) -> String {
    if collisions.is_empty() {
        return String::new();
    }
    let name = &ctx.personality.name;
    let lines: Vec<String> = collisions
        .iter()
        .map(|label| {
            format!(
                "{label} is a user who shares your name. They are not you. \
                 Never respond as {label} and never treat their messages as your own; \
                 you are only {name}."
            )
        })
        .collect();
    text_block(Section::IdentityConstraints, &lines.join("\n"))
}

fn render_context(ctx: &RequestContext) -> String {
    let mut el = Element::new("context")
        .child(
            Element::new("current_time")
                .text(&format_current_time(ctx))
                .render(),
        );

    if let Some(location) = &ctx.location {
        let loc = if location.direct_message {
            Element::new("location").attr("type", "direct_message")
        } else {
            Element::new("location")
                .attr("type", "channel")
                .attr_opt("server", location.server_name.as_deref())
                .attr_opt("channel", location.channel_name.as_deref())
        };
        let loc = match location.topic.as_deref() {
            Some(topic) if !topic.is_empty() => loc.text(topic),
            _ => loc,
        };
        el = el.child(loc.render());
    }

    el.child(Element::new("request_id").text(&ctx.request_id).render())
        .render()
}

fn render_participants(
    ctx: &RequestContext,
    names: &SpeakerNames,
    participants: &[Participant],
) -> String {
    let me = &ctx.personality;
    let rendered: Vec<String> = participants
        .iter()
        .filter(|p| {
            !(p.kind == ParticipantKind::Personality
                && (p.id == me.id || p.display_name.eq_ignore_ascii_case(&me.name)))
        })
        .map(|p| {
            let kind = match p.kind {
                ParticipantKind::User => "user",
                ParticipantKind::Personality => "personality",
            };
            let el = Element::new("participant")
                .attr("name", names.participant_label(p))
                .attr("kind", kind);
            match p.description.as_deref().map(str::trim) {
                Some(desc) if !desc.is_empty() => el.text(desc),
                _ => el,
            }
            .render()
        })
        .collect();
    block(Section::Participants.tag(), &rendered.join("\n"))
}

/// Referenced messages not already in the chat log, deduplicated by id.
fn render_references(
    ctx: &RequestContext,
    references: &[QuotedMessage],
    included_ids: &HashSet<EntryId>,
) -> String {
    let mut seen: HashSet<&EntryId> = HashSet::new();
    let rendered: Vec<String> = references
        .iter()
        .filter(|r| !included_ids.contains(&r.id) && seen.insert(&r.id))
        .map(|r| render_quote(ctx, r))
        .collect();
    block(Section::ReferencedMessages.tag(), &rendered.join("\n"))
}
