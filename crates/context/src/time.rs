//! Timestamp and duration formatting in the requester's timezone.

use chrono::{DateTime, Duration, Utc};

use crate::request::RequestContext;

/// Timestamp attached to a history entry, e.g. `Mon Oct 19 2026 2:03 PM`.
pub fn format_entry_time(ctx: &RequestContext, at: DateTime<Utc>) -> String {
    at.with_timezone(&ctx.timezone)
        .format("%a %b %-d %Y %-I:%M %p")
        .to_string()
}

/// Date prefix of a memory line, e.g. `Mon, Oct 19, 2026`.
pub fn format_memory_date(ctx: &RequestContext, at: DateTime<Utc>) -> String {
    at.with_timezone(&ctx.timezone)
        .format("%a, %b %-d, %Y")
        .to_string()
}

/// The "current time" line of the context section,
/// e.g. `Monday, October 19, 2026 at 2:03 PM EDT`.
pub fn format_current_time(ctx: &RequestContext) -> String {
    ctx.now
        .with_timezone(&ctx.timezone)
        .format("%A, %B %-d, %Y at %-I:%M %p %Z")
        .to_string()
}

/// Human description of a gap, using the two largest non-zero units:
/// `2 days, 3 hours`, `1 hour, 5 minutes`, `45 minutes`.
pub fn describe_gap(gap: Duration) -> String {
    let total_minutes = gap.num_minutes().max(0);
    if total_minutes == 0 {
        return "less than a minute".to_string();
    }

    let days = total_minutes / (60 * 24);
    let hours = (total_minutes / 60) % 24;
    let minutes = total_minutes % 60;

    let parts: Vec<String> = [(days, "day"), (hours, "hour"), (minutes, "minute")]
        .into_iter()
        .filter(|(n, _)| *n > 0)
        .take(2)
        .map(|(n, unit)| {
            if n == 1 {
                format!("1 {unit}")
            } else {
                format!("{n} {unit}s")
            }
        })
        .collect();

    parts.join(", ")
}
