//! Memory archive rendering.

use chorus_core::MemoryDocument;

use crate::markup::{Element, escape_xml};
use crate::request::RequestContext;
use crate::time::format_memory_date;

const ARCHIVE_INSTRUCTION: &str = "These are things you remember from earlier conversations. \
They are background, not part of the current chat; bring one up only when it is relevant.";

/// Joins archive lines.
pub const MEMORY_SEPARATOR: &str = "\n";

/// The exact line a memory contributes to the archive:
/// `[Mon, Oct 19, 2026] content`, or just `content` without a timestamp.
///
/// The selector measures this string, so what is measured is what is sent.
pub fn render_memory_line(ctx: &RequestContext, memory: &MemoryDocument) -> String {
    let content = escape_xml(memory.content.trim());
    match memory.metadata.created_at {
        Some(at) => format!("[{}] {}", format_memory_date(ctx, at), content),
        None => content.into_owned(),
    }
}

/// Wrap accepted memory lines; empty when there are none.
pub fn render_memory_archive(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let instruction = Element::new("instruction").text(ARCHIVE_INSTRUCTION).render();
    format!(
        "<memory_archive>\n{}\n{}\n</memory_archive>",
        instruction,
        lines.join(MEMORY_SEPARATOR)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::Personality;
    use chrono::{TimeZone, Utc};

    fn ctx() -> RequestContext {
        RequestContext::new(Personality::new("lila", "Lila")).with_timezone(chrono_tz::Asia::Tokyo)
    }

    #[test]
    fn line_with_timestamp_in_requester_zone() {
        let memory = MemoryDocument::new("m1", "Bob adopted a cat named Tofu")
            .created_at(Utc.with_ymd_and_hms(2026, 3, 1, 20, 0, 0).unwrap());
        assert_eq!(
            render_memory_line(&ctx(), &memory),
            "[Mon, Mar 2, 2026] Bob adopted a cat named Tofu"
        );
    }

    #[test]
    fn line_without_timestamp_is_bare() {
        let memory = MemoryDocument::new("m1", "  likes <tea>  ");
        assert_eq!(render_memory_line(&ctx(), &memory), "likes &lt;tea&gt;");
    }

    #[test]
    fn archive_wraps_lines() {
        let archive = render_memory_archive(&["one".into(), "two".into()]);
        assert!(archive.starts_with("<memory_archive>\n<instruction>"));
        assert!(archive.ends_with("one\ntwo\n</memory_archive>"));
        assert_eq!(render_memory_archive(&[]), "");
    }
}
