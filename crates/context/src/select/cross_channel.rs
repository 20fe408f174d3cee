//! Cross-channel history.
//!
//! Groups from other channels get whatever the current channel left over.
//! Allocation runs newest group first using the fast estimate; rendering
//! runs oldest group first. Rendered groups are then measured with the real
//! tokenizer. A measured overrun of the nominal budget is tolerated up to
//! `max_overrun_ratio`; past that, whole groups are discarded oldest-first.
//! Groups are rendered independently, so discarding one never requires
//! re-rendering another.

use std::collections::HashSet;

use chorus_core::{CrossChannelGroup, EntryId, TokenCounter, TokenizerError};
use serde::Serialize;
use tracing::{debug, warn};

use crate::markup::Element;
use crate::request::{EngineOptions, RequestContext};
use crate::select::history::{HistoryOptions, HistoryWindow, select_window};
use crate::serialize::{HistoryRenderer, SpeakerNames};

/// `<channel name="" server="">` + newlines + `</channel>`.
const GROUP_OVERHEAD_CHARS: usize = 40;

const CROSS_CHANNEL_INSTRUCTION: &str = "Recent messages from other channels you take part in. \
They are older context, not the conversation you are replying to.";

#[derive(Debug, Clone, Copy)]
pub struct CrossChannelOptions {
    pub history: HistoryOptions,
    /// Overruns above this share of the budget are logged at warn level
    pub warn_overrun_ratio: f32,
    /// Overruns above this share of the budget discard groups
    pub max_overrun_ratio: f32,
}

impl From<&EngineOptions> for CrossChannelOptions {
    fn from(options: &EngineOptions) -> Self {
        Self {
            history: HistoryOptions::from(options),
            warn_overrun_ratio: options.warn_overrun_ratio,
            max_overrun_ratio: options.max_overrun_ratio,
        }
    }
}

impl Default for CrossChannelOptions {
    fn default() -> Self {
        Self::from(&EngineOptions::default())
    }
}

/// Outcome of cross-channel selection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrossChannelSelection {
    #[serde(skip)]
    pub markup: String,
    /// Nominal budget handed in
    pub budget: usize,
    /// Character-estimate cost at allocation time
    pub estimated_tokens: usize,
    /// Tokenizer-measured cost of `markup`
    pub measured_tokens: usize,
    /// `measured_tokens - budget`, when positive
    pub overrun: usize,
    pub groups_included: usize,
    /// Groups thrown away by the overrun cap
    pub groups_discarded: usize,
    pub included: usize,
    pub dropped: usize,
}

impl CrossChannelSelection {
    pub fn overrun_ratio(&self) -> f64 {
        if self.budget == 0 {
            return 0.0;
        }
        self.overrun as f64 / self.budget as f64
    }
}

/// Estimated tokens for one group's wrapper markup.
pub fn group_overhead_tokens(group: &CrossChannelGroup, chars_per_token: usize) -> usize {
    let chars = GROUP_OVERHEAD_CHARS
        + group.channel_name.len()
        + group.server_name.as_ref().map_or(0, String::len);
    chars.div_ceil(chars_per_token.max(1))
}

fn wrap_groups(groups: &str) -> String {
    let instruction = Element::new("instruction")
        .text(CROSS_CHANNEL_INSTRUCTION)
        .render();
    format!("<other_channels>\n{instruction}\n{groups}\n</other_channels>")
}

fn join_groups(rendered: &[RenderedGroup]) -> String {
    let joined = rendered
        .iter()
        .map(|g| g.markup.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    wrap_groups(&joined)
}

struct RenderedGroup {
    markup: String,
    included: usize,
}

/// Select, render, and measure cross-channel groups (oldest group first).
///
/// `current_ids` are the ids already kept from the current channel; quotes
/// of those entries are not repeated.
pub fn select_cross_channel(
    ctx: &RequestContext,
    groups: &[CrossChannelGroup],
    budget: usize,
    names: &SpeakerNames,
    current_ids: &HashSet<EntryId>,
    options: &CrossChannelOptions,
    counter: &dyn TokenCounter,
) -> Result<CrossChannelSelection, TokenizerError> {
    let total_entries: usize = groups.iter().map(|g| g.entries.len()).sum();
    let mut selection = CrossChannelSelection {
        budget,
        dropped: total_entries,
        ..Default::default()
    };

    let outer_overhead = options.history.wrapper_overhead_tokens;
    if groups.is_empty() || budget <= outer_overhead {
        return Ok(selection);
    }

    // ── Allocation: newest group first ──
    let mut remaining = budget - outer_overhead;
    let mut windows: Vec<Option<HistoryWindow>> = vec![None; groups.len()];
    for (i, group) in groups.iter().enumerate().rev() {
        let overhead = group_overhead_tokens(group, options.history.chars_per_token);
        if remaining <= overhead {
            continue;
        }
        let group_options = HistoryOptions {
            wrapper_overhead_tokens: overhead,
            ..options.history
        };
        let window = select_window(&group.entries, remaining, &group_options);
        if window.included == 0 {
            continue;
        }
        remaining -= window.tokens_used + overhead;
        selection.estimated_tokens += window.tokens_used + overhead;
        windows[i] = Some(window);
    }

    // ── Rendering: oldest group first, each on its own ──
    let mut rendered: Vec<RenderedGroup> = Vec::new();
    for (group, window) in groups.iter().zip(&windows) {
        let Some(window) = window else { continue };
        let kept = &group.entries[window.start..];

        let mut ids = current_ids.clone();
        ids.extend(kept.iter().map(|e| e.id.clone()));
        let body = HistoryRenderer::new(ctx, names, &ids, options.history.time_gap)
            .render_entries(kept);

        let open = Element::new("channel")
            .attr("name", &group.channel_name)
            .attr_opt("server", group.server_name.as_deref())
            .open_tag();
        rendered.push(RenderedGroup {
            markup: format!("{open}\n{body}\n</channel>"),
            included: kept.len(),
        });
    }

    if rendered.is_empty() {
        return Ok(selection);
    }

    // ── Hard cap, checked against the joined markup ──
    let cap = budget + (budget as f64 * f64::from(options.max_overrun_ratio)) as usize;
    let mut markup = join_groups(&rendered);
    let mut measured = counter.count(&markup)?;
    while measured > cap {
        rendered.remove(0);
        selection.groups_discarded += 1;
        if rendered.is_empty() {
            break;
        }
        markup = join_groups(&rendered);
        measured = counter.count(&markup)?;
    }

    if selection.groups_discarded > 0 {
        warn!(
            discarded = selection.groups_discarded,
            budget,
            cap,
            "Cross-channel history over the overrun cap, discarded oldest groups"
        );
    }

    if rendered.is_empty() {
        return Ok(selection);
    }

    selection.markup = markup;
    selection.measured_tokens = measured;
    selection.groups_included = rendered.len();
    selection.included = rendered.iter().map(|g| g.included).sum();
    selection.dropped = total_entries - selection.included;
    selection.overrun = selection.measured_tokens.saturating_sub(budget);

    let ratio = selection.overrun_ratio();
    if ratio > f64::from(options.warn_overrun_ratio) {
        warn!(
            overrun = selection.overrun,
            budget,
            overrun_pct = ratio * 100.0,
            "Cross-channel history overran its budget"
        );
    } else if selection.overrun > 0 {
        debug!(
            overrun = selection.overrun,
            budget, "Cross-channel history overran its budget slightly"
        );
    }

    debug!(
        groups = selection.groups_included,
        included = selection.included,
        estimated = selection.estimated_tokens,
        measured = selection.measured_tokens,
        "Cross-channel selection complete"
    );

    Ok(selection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::{ConversationEntry, HeuristicCounter, Personality};
    use chrono::{Duration, TimeZone, Utc};

    fn ctx() -> RequestContext {
        RequestContext::new(Personality::new("lila", "Lila"))
    }

    fn names() -> SpeakerNames {
        let none: &[ConversationEntry] = &[];
        SpeakerNames::collect("Lila", none, &[])
    }

    fn options(wrapper: usize) -> CrossChannelOptions {
        CrossChannelOptions {
            history: HistoryOptions {
                chars_per_token: 4,
                wrapper_overhead_tokens: wrapper,
                time_gap: Duration::minutes(60),
            },
            warn_overrun_ratio: 0.05,
            max_overrun_ratio: 0.10,
        }
    }

    fn group(name: &str, day: u32, contents: &[&str], cached: Option<usize>) -> CrossChannelGroup {
        let base = Utc.with_ymd_and_hms(2026, 10, day, 9, 0, 0).unwrap();
        let entries = contents
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let entry = ConversationEntry::user(
                    format!("{name}-{i}"),
                    "p",
                    "Bob",
                    *text,
                    base + Duration::minutes(i as i64),
                );
                match cached {
                    Some(tokens) => entry.with_token_count(tokens),
                    None => entry,
                }
            })
            .collect();
        CrossChannelGroup {
            channel_name: name.to_string(),
            server_name: None,
            entries,
        }
    }

    #[test]
    fn empty_groups_or_tiny_budget() {
        let counter = HeuristicCounter::default();
        let sel =
            select_cross_channel(&ctx(), &[], 500, &names(), &HashSet::new(), &options(10), &counter)
                .unwrap();
        assert!(sel.markup.is_empty());

        let groups = vec![group("#a", 1, &["hi", "there"], None)];
        let sel =
            select_cross_channel(&ctx(), &groups, 10, &names(), &HashSet::new(), &options(10), &counter)
                .unwrap();
        assert!(sel.markup.is_empty());
        assert_eq!(sel.dropped, 2);
    }

    #[test]
    fn renders_oldest_group_first() {
        let counter = HeuristicCounter::default();
        let groups = vec![
            group("#old", 1, &["first"], None),
            group("#new", 2, &["second"], None),
        ];
        let sel = select_cross_channel(
            &ctx(),
            &groups,
            10_000,
            &names(),
            &HashSet::new(),
            &options(10),
            &counter,
        )
        .unwrap();

        assert_eq!(sel.groups_included, 2);
        assert_eq!(sel.included, 2);
        assert_eq!(sel.overrun, 0);
        let old = sel.markup.find(r##"<channel name="#old">"##).unwrap();
        let new = sel.markup.find(r##"<channel name="#new">"##).unwrap();
        assert!(old < new);
        assert!(sel.markup.starts_with("<other_channels>"));
    }

    #[test]
    fn newest_group_gets_budget_first() {
        let counter = HeuristicCounter::default();
        let groups = vec![
            group("#old", 1, &["a", "b"], Some(50)),
            group("#new", 2, &["c", "d"], Some(50)),
        ];
        let overhead = group_overhead_tokens(&groups[1], 4);
        let budget = 10 + overhead + 100 + 5;
        let sel = select_cross_channel(
            &ctx(),
            &groups,
            budget,
            &names(),
            &HashSet::new(),
            &options(10),
            &counter,
        )
        .unwrap();

        assert_eq!(sel.groups_included, 1);
        assert!(sel.markup.contains("#new"));
        assert!(!sel.markup.contains("#old"));
        assert_eq!(sel.dropped, 2);
    }

    #[test]
    fn overrun_past_cap_discards_oldest_groups() {
        let counter = HeuristicCounter::default();
        let long = "x".repeat(400);
        // Cached counts wildly understate the rendered size.
        let groups = vec![
            group("#a", 1, &[long.as_str()], Some(1)),
            group("#b", 2, &[long.as_str()], Some(1)),
            group("#c", 3, &[long.as_str()], Some(1)),
        ];
        let budget = 200;
        let sel = select_cross_channel(
            &ctx(),
            &groups,
            budget,
            &names(),
            &HashSet::new(),
            &options(10),
            &counter,
        )
        .unwrap();

        assert!(sel.groups_discarded >= 1);
        assert!(sel.measured_tokens <= budget + budget / 10);
        assert!(sel.markup.contains("#c"));
        assert!(!sel.markup.contains("#a"));
        assert_eq!(sel.groups_included + sel.groups_discarded, 3);
    }

    #[test]
    fn small_overrun_within_cap_is_kept() {
        let counter = HeuristicCounter::default();
        let text = "y".repeat(200);
        // Cached counts understate the rendered size.
        let groups = vec![group("#a", 1, &[text.as_str(), text.as_str()], Some(1))];
        let run = |budget| {
            select_cross_channel(
                &ctx(),
                &groups,
                budget,
                &names(),
                &HashSet::new(),
                &options(10),
                &counter,
            )
            .unwrap()
        };

        let roomy = run(10_000);
        assert_eq!(roomy.overrun, 0);
        let measured = roomy.measured_tokens;

        // About 5% short of what the markup measures, inside the 10% cap.
        let budget = measured * 100 / 105;
        let sel = run(budget);
        assert_eq!(sel.groups_included, 1);
        assert_eq!(sel.groups_discarded, 0);
        assert_eq!(sel.included, 2);
        assert_eq!(sel.measured_tokens, measured);
        assert_eq!(sel.overrun, measured - budget);
        assert!(sel.overrun > 0);
        assert!(sel.overrun_ratio() <= 0.10);
    }

    #[test]
    fn joined_markup_never_exceeds_cap() {
        let counter = HeuristicCounter::default();
        let long = "x".repeat(300);
        let groups: Vec<_> = (1..=4)
            .map(|day| group(&format!("#g{day}"), day, &[long.as_str(), "ok"], Some(1)))
            .collect();
        for budget in (60..600).step_by(7) {
            let sel = select_cross_channel(
                &ctx(),
                &groups,
                budget,
                &names(),
                &HashSet::new(),
                &options(10),
                &counter,
            )
            .unwrap();
            if !sel.markup.is_empty() {
                assert!(sel.measured_tokens <= budget + budget / 10, "budget {budget}");
                assert_eq!(sel.measured_tokens, counter.estimate(&sel.markup));
            }
        }
    }

    #[test]
    fn quotes_of_current_channel_entries_not_repeated() {
        let counter = HeuristicCounter::default();
        let mut groups = vec![group("#a", 1, &["see above"], None)];
        groups[0].entries[0] = groups[0].entries[0].clone().with_quote(chorus_core::QuotedMessage {
            id: EntryId::new("cur-1"),
            author: "Bob".into(),
            role: chorus_core::Role::User,
            content: "quoted".into(),
            created_at: None,
        });
        let current: HashSet<EntryId> = [EntryId::new("cur-1")].into_iter().collect();
        let sel =
            select_cross_channel(&ctx(), &groups, 5000, &names(), &current, &options(10), &counter)
                .unwrap();
        assert!(!sel.markup.contains("<quote"));
    }
}
