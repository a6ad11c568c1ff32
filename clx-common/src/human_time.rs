//! Human-readable duration formatting
//!
//! Used for advisory ETA display in job status payloads and UI labels.
//! Selection by magnitude:
//! - `< 100s` → `XXs`
//! - `< 100m` → `M:SS`
//! - `< 25h`  → `H:MM:SS`
//! - otherwise → `X.Xd`

const SHORT_FORMAT_MAX: u64 = 100; // < 100s → XXs
const MEDIUM_FORMAT_MAX: u64 = 6000; // < 100m → M:SS
const LONG_FORMAT_MAX: u64 = 90_000; // < 25h → H:MM:SS

/// Format a duration in seconds as a human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < SHORT_FORMAT_MAX {
        format!("{}s", seconds)
    } else if seconds < MEDIUM_FORMAT_MAX {
        let minutes = seconds / 60;
        let secs = seconds % 60;
        format!("{}:{:02}", minutes, secs)
    } else if seconds < LONG_FORMAT_MAX {
        let hours = seconds / 3600;
        let mins = (seconds % 3600) / 60;
        let secs = seconds % 60;
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        let days = seconds as f64 / 86_400.0;
        format!("{:.1}d", days)
    }
}

/// Format an optional ETA; `None` renders as "calculating"
///
/// Callers pass `None` while words/second cannot be derived yet
/// (no words processed, or elapsed time still ~0).
pub fn format_eta(eta_seconds: Option<u64>) -> String {
    match eta_seconds {
        Some(secs) => format_duration(secs),
        None => "calculating".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_format() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(99), "99s");
    }

    #[test]
    fn test_medium_format() {
        assert_eq!(format_duration(100), "1:40");
        assert_eq!(format_duration(330), "5:30");
        assert_eq!(format_duration(5999), "99:59");
    }

    #[test]
    fn test_long_format() {
        assert_eq!(format_duration(7200), "2:00:00");
        assert_eq!(format_duration(3661 + 3600), "2:01:01");
        assert_eq!(format_duration(6000), "1:40:00");
    }

    #[test]
    fn test_extended_format() {
        assert_eq!(format_duration(90_000), "1.0d");
        assert_eq!(format_duration(604_800), "7.0d");
    }

    #[test]
    fn test_eta_none_is_calculating() {
        assert_eq!(format_eta(None), "calculating");
        assert_eq!(format_eta(Some(30)), "30s");
    }
}
