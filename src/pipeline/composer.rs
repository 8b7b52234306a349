//! Document composition — merges event texts into one HTML email body.
//!
//! Pure string transforms, no I/O.

use chrono::{DateTime, TimeZone};

use crate::pipeline::types::RawEvent;

/// Shown in place of the text when no event in a post carried any.
pub const EMPTY_PLACEHOLDER: &str = "<div>(no text)</div>";

/// Visible divider between the texts of a multi-event post.
pub const PART_DIVIDER: &str = "<hr>";

/// Inline tag pairs rewritten by [`normalize`]. Links, inline code and code
/// blocks are already in canonical form and pass through unchanged.
const TAG_MAP: &[(&str, &str)] = &[
    ("<b>", "<strong>"),
    ("</b>", "</strong>"),
    ("<i>", "<em>"),
    ("</i>", "</em>"),
];

/// Map transport inline markup to the canonical tag set
/// (`<strong>`, `<em>`, `<a>`, `<code>`, `<pre>`).
///
/// Total and idempotent: canonical tags are never rewritten again.
pub fn normalize(markup: &str) -> String {
    TAG_MAP
        .iter()
        .fold(markup.to_string(), |acc, (from, to)| acc.replace(from, to))
}

/// Normalized, trimmed text of one event. Empty when the event has none.
pub fn event_text(event: &RawEvent) -> String {
    normalize(&event.markup).trim().to_string()
}

/// Join the non-empty parts and wrap them in the document template.
///
/// The divider appears only between two or more non-empty parts; an empty
/// result gets [`EMPTY_PLACEHOLDER`].
pub fn compose<S: AsRef<str>>(parts: &[S]) -> String {
    let joined = parts
        .iter()
        .map(|p| p.as_ref().trim())
        .filter(|p| !p.is_empty())
        .map(|p| format!("<div>{p}</div>"))
        .collect::<Vec<_>>()
        .join(PART_DIVIDER);

    let content = if joined.is_empty() {
        EMPTY_PLACEHOLDER
    } else {
        joined.as_str()
    };

    format!(
        r#"<!doctype html>
<html>
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Telegram Post</title>
</head>
<body>
  <div style="font-family: Arial, sans-serif; font-size: 14px; line-height: 1.45;">
    {content}
  </div>
</body>
</html>
"#
    )
}

/// Compose the body for a whole burst, in event order.
pub fn compose_events(events: &[RawEvent]) -> String {
    let parts: Vec<String> = events.iter().map(event_text).collect();
    compose(&parts)
}

/// Subject line stamped with `now`.
pub fn subject<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("Telegram post - {}", now.format("%Y-%m-%d %H:%M:%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn normalize_maps_bold_and_italic() {
        assert_eq!(
            normalize("<b>bold</b> and <i>it</i>"),
            "<strong>bold</strong> and <em>it</em>"
        );
    }

    #[test]
    fn normalize_keeps_links_and_code() {
        let input = r#"<a href="https://t.me">x</a> <code>y</code> <pre>z</pre>"#;
        assert_eq!(normalize(input), input);
    }

    #[test]
    fn normalize_is_idempotent() {
        let samples = [
            "",
            "plain",
            "<b><i>nested</i></b>",
            "<strong>already</strong><em>canonical</em>",
            "<blockquote>q</blockquote><br><b>x</b>",
            "&lt;b&gt;escaped&lt;/b&gt;",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn normalize_leaves_similar_tags_alone() {
        assert_eq!(normalize("<blockquote>q</blockquote>"), "<blockquote>q</blockquote>");
        assert_eq!(normalize("<br>"), "<br>");
    }

    #[test]
    fn compose_empty_uses_placeholder() {
        let empty: [&str; 0] = [];
        assert!(compose(&empty).contains(EMPTY_PLACEHOLDER));
        assert!(compose(&["", ""]).contains(EMPTY_PLACEHOLDER));
        assert!(compose(&["  ", "\n"]).contains(EMPTY_PLACEHOLDER));
    }

    #[test]
    fn compose_two_parts_in_order_with_divider() {
        let doc = compose(&["a", "b"]);
        assert!(doc.contains("<div>a</div><hr><div>b</div>"));
        assert!(!doc.contains(EMPTY_PLACEHOLDER));
    }

    #[test]
    fn compose_single_part_has_no_divider() {
        let doc = compose(&["", "only", ""]);
        assert!(doc.contains("<div>only</div>"));
        assert!(!doc.contains(PART_DIVIDER));
    }

    #[test]
    fn compose_is_a_full_document() {
        let doc = compose(&["x"]);
        assert!(doc.starts_with("<!doctype html>"));
        assert!(doc.contains(r#"<meta charset="utf-8">"#));
        assert!(doc.trim_end().ends_with("</html>"));
    }

    #[test]
    fn compose_events_skips_textless_events() {
        let events = vec![
            RawEvent::new(1, 1),
            RawEvent::new(1, 2).with_markup("<b>caption</b>"),
            RawEvent::new(1, 3).with_markup("   "),
        ];
        let doc = compose_events(&events);
        assert!(doc.contains("<div><strong>caption</strong></div>"));
        assert!(!doc.contains(PART_DIVIDER));
    }

    #[test]
    fn subject_contains_timestamp() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        assert_eq!(subject(&now), "Telegram post - 2026-03-14 09:26:53");
    }
}
