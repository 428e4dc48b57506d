use std::borrow::Cow;

use chrono::{DateTime, Duration, Utc};

/// Ellipsis appended to truncated text
const ELLIPSIS: &str = "...";

/// Formats how long ago `published` was, relative to `now`.
///
/// - under a minute (or in the future): `"now"`
/// - under an hour: `"5m ago"`
/// - under a day: `"3h ago"`
/// - the previous calendar day: `"yesterday"`
/// - under a week: `"4d ago"`
/// - under a year: `"Mar 4"`
/// - older: `"Mar 4, 2023"`
///
/// Calendar days are UTC days.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, TimeZone, Utc};
/// use swipefeed::util::relative_time;
///
/// let now = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
/// assert_eq!(relative_time(now - Duration::minutes(5), now), "5m ago");
/// assert_eq!(relative_time(now - Duration::days(4), now), "4d ago");
/// ```
pub fn relative_time(published: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(published);

    if elapsed < Duration::minutes(1) {
        return "now".to_string();
    }
    if elapsed < Duration::hours(1) {
        return format!("{}m ago", elapsed.num_minutes());
    }
    if elapsed < Duration::hours(24) {
        return format!("{}h ago", elapsed.num_hours());
    }
    if now.date_naive().pred_opt() == Some(published.date_naive()) {
        return "yesterday".to_string();
    }
    if elapsed < Duration::days(7) {
        return format!("{}d ago", elapsed.num_days());
    }
    if elapsed < Duration::days(365) {
        return published.format("%b %-d").to_string();
    }
    published.format("%b %-d, %Y").to_string()
}

/// Truncates `text` to at most `max_chars` characters plus `"..."`.
///
/// When the last space inside the cut falls within the final 20% of it,
/// the cut moves back to that space so the last word stays whole.
/// Text that already fits is returned borrowed.
///
/// # Examples
///
/// ```
/// use swipefeed::util::truncate_summary;
///
/// assert_eq!(truncate_summary("Short", 10), "Short");
/// assert_eq!(truncate_summary("Parliament returns today", 12), "Parliament...");
/// ```
pub fn truncate_summary(text: &str, max_chars: usize) -> Cow<'_, str> {
    // Byte offset of the first char past the limit
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return Cow::Borrowed(text);
    };

    let head = &text[..cut];
    let word_break = head.rfind(' ').filter(|&space| {
        let chars_before = head[..space].chars().count();
        chars_before * 5 > max_chars * 4
    });

    match word_break {
        Some(space) => Cow::Owned(format!("{}{ELLIPSIS}", &head[..space])),
        None => Cow::Owned(format!("{head}{ELLIPSIS}")),
    }
}

/// Collapses text to a single terminal-safe line.
///
/// Control characters are dropped and runs of whitespace become one space,
/// so titles and summaries from a remote store cannot move the cursor or
/// break the listing layout.
pub fn single_line(s: &str) -> Cow<'_, str> {
    let clean = !s.chars().any(char::is_control) && !s.contains("  ");
    if clean && s.trim() == s {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    for word in s
        .split(|c: char| c.is_whitespace() || c.is_control())
        .filter(|w| !w.is_empty())
    {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    Cow::Owned(out)
}
