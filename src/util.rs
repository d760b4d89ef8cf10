use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use tracing_subscriber::{EnvFilter, fmt};

pub fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .try_init();
}

pub fn human_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    let seconds = secs % 60;

    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

pub fn elapsed_between(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> String {
    human_duration((end - start).to_std().unwrap_or_default())
}

pub fn format_clock_time(ts: DateTime<FixedOffset>) -> String {
    ts.format("%H:%M:%S").to_string()
}

/// `Mon Jan  2 15:04:05 2006` style, for start times the user may need to
/// copy into a calendar by hand.
pub fn format_timestamp(ts: DateTime<FixedOffset>) -> String {
    ts.format("%a %b %e %H:%M:%S %Y (%:z)").to_string()
}

/// OSC 8 terminal hyperlink, or `label (url)` when links are not rendered.
pub fn hyperlink(label: &str, url: &str, enabled: bool) -> String {
    if enabled {
        format!("\u{1b}]8;;{url}\u{1b}\\{label}\u{1b}]8;;\u{1b}\\")
    } else {
        format!("{label} ({url})")
    }
}

pub fn truncate(input: &str, max_len: usize) -> String {
    let single_line = input.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.len() <= max_len {
        return single_line;
    }
    let mut end = max_len.saturating_sub(3);
    while end > 0 && !single_line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &single_line[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formatting() {
        assert_eq!(human_duration(Duration::from_secs(42)), "42s");
        assert_eq!(human_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(human_duration(Duration::from_secs(3 * 3_600 + 61)), "3h 1m");
        assert_eq!(human_duration(Duration::from_secs(90_000)), "1d 1h");
    }

    #[test]
    fn negative_elapsed_is_zero() {
        let start = DateTime::parse_from_rfc3339("2026-03-02T10:00:00Z").expect("start");
        let end = DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z").expect("end");
        assert_eq!(elapsed_between(start, end), "0s");
        assert_eq!(elapsed_between(end, start), "1h 0m");
    }

    #[test]
    fn timestamp_formatting_keeps_offset() {
        let ts = DateTime::parse_from_rfc3339("2026-03-02T09:05:07-05:00").expect("ts");
        assert_eq!(format_clock_time(ts), "09:05:07");
        assert_eq!(format_timestamp(ts), "Mon Mar  2 09:05:07 2026 (-05:00)");
    }

    #[test]
    fn hyperlink_falls_back_to_plain_text() {
        assert_eq!(
            hyperlink("work block", "https://example.test/e", false),
            "work block (https://example.test/e)"
        );
        let rendered = hyperlink("work block", "https://example.test/e", true);
        assert!(rendered.starts_with("\u{1b}]8;;https://example.test/e"));
        assert!(rendered.contains("work block"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("line one\nline two", 100), "line one line two");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
        assert_eq!(truncate("ééééé", 6), "é...");
    }
}
