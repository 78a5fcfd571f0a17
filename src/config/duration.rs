//! Human-readable duration strings used in `cloudport.yaml`.

use std::time::Duration;

/// Parse a duration string like "500ms", "30s", "10m" or "1h".
///
/// A bare number is taken as seconds. Returns `None` for anything else.
///
/// # Examples
///
/// ```
/// use cloudport::config::parse_duration_string;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration_string("500ms"), Some(Duration::from_millis(500)));
/// assert_eq!(parse_duration_string("10m"), Some(Duration::from_secs(600)));
/// assert_eq!(parse_duration_string("45"), Some(Duration::from_secs(45)));
/// ```
pub fn parse_duration_string(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let (digits, scale): (&str, fn(u64) -> Duration) = if let Some(n) = s.strip_suffix("ms") {
        (n, Duration::from_millis)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, Duration::from_secs)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, |m| Duration::from_secs(m * 60))
    } else if let Some(n) = s.strip_suffix('h') {
        (n, |h| Duration::from_secs(h * 3600))
    } else {
        (s, Duration::from_secs)
    };

    digits.trim().parse::<u64>().ok().map(scale)
}

/// Render a duration back into the shortest unit that represents it exactly.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms % 1000 != 0 {
        format!("{}ms", ms)
    } else {
        let secs = d.as_secs();
        if secs != 0 && secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs != 0 && secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{}s", secs)
        }
    }
}
