//! ID, time, and truncation formatters for CLI output.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// First 8 chars of a UUID for list display.
pub fn short_id(id: &Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Coarse age of a timestamp: "just now", "5m ago", "3h ago", "2d ago".
pub fn relative_time(dt: &DateTime<Utc>) -> String {
    let secs = (Utc::now() - *dt).num_seconds().max(0);
    match secs {
        0..=59 => "just now".to_string(),
        60..=3_599 => format!("{}m ago", secs / 60),
        3_600..=86_399 => format!("{}h ago", secs / 3_600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

/// Truncate on a char boundary with a unicode ellipsis.
pub fn truncate_ellipsis(s: &str, max_chars: usize) -> String {
    let first_line = s.lines().next().unwrap_or_default();
    if first_line.chars().count() <= max_chars && first_line.len() == s.trim_end().len() {
        return first_line.to_string();
    }
    let kept: String = first_line.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}\u{2026}", kept.trim_end())
}

/// `"1 note"` or `"3 notes"`.
pub fn count_label(n: usize, singular: &str, plural: &str) -> String {
    if n == 1 {
        format!("{n} {singular}")
    } else {
        format!("{n} {plural}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_short_id() {
        let id = Uuid::parse_str("1234abcd-0000-0000-0000-000000000000").unwrap();
        assert_eq!(short_id(&id), "1234abcd");
    }

    #[test]
    fn test_relative_time_buckets() {
        let now = Utc::now();
        assert_eq!(relative_time(&now), "just now");
        assert_eq!(relative_time(&(now - Duration::minutes(5))), "5m ago");
        assert_eq!(relative_time(&(now - Duration::hours(3))), "3h ago");
        assert_eq!(relative_time(&(now - Duration::days(2))), "2d ago");
    }

    #[test]
    fn test_truncate_ellipsis() {
        assert_eq!(truncate_ellipsis("short", 10), "short");
        assert_eq!(truncate_ellipsis("a fairly long goal", 8), "a fairl\u{2026}");
        assert_eq!(truncate_ellipsis("line one\nline two", 40), "line one\u{2026}");
        assert_eq!(truncate_ellipsis("héllo wörld", 6), "héllo\u{2026}");
    }

    #[test]
    fn test_count_label() {
        assert_eq!(count_label(1, "note", "notes"), "1 note");
        assert_eq!(count_label(3, "note", "notes"), "3 notes");
    }
}
