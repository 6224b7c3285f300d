//! Shared utility functions used across the crate.

use std::time::Duration;

use crate::error::ConfigError;

/// Parse a duration string (e.g., "30s", "500ms", "1m", "1h") into std::time::Duration.
///
/// Supported formats:
/// - `Nms` - milliseconds (e.g., "500ms")
/// - `Ns` - seconds, fractional allowed (e.g., "30s", "0.5s")
/// - `Nm` - minutes (e.g., "5m")
/// - `Nh` - hours (e.g., "1h")
/// - Plain number - treated as milliseconds (e.g., "1000")
///
/// Returns `None` if the string cannot be parsed or is negative.
pub fn parse_duration_str(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (number, scale) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, 0.001)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1.0)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60.0)
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, 3600.0)
    } else {
        (s, 0.001)
    };

    let value = number.trim().parse::<f64>().ok()?;
    Duration::try_from_secs_f64(value * scale).ok()
}

/// Parse a duration for a named config field, failing with a [`ConfigError`].
pub fn parse_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration_str(value).ok_or_else(|| ConfigError::invalid_duration(field, value))
}

/// Parse an optional duration field, falling back to `default` when absent.
pub fn parse_duration_or(
    field: &str,
    value: Option<&str>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        Some(v) => parse_duration(field, v),
        None => Ok(default),
    }
}

/// Milliseconds as a float, the unit thresholds and reports use for durations.
pub fn as_millis_f64(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_milliseconds() {
        assert_eq!(
            parse_duration_str("500ms"),
            Some(Duration::from_millis(500))
        );
        assert_eq!(
            parse_duration_str("1000ms"),
            Some(Duration::from_millis(1000))
        );
    }

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_duration_str("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration_str("15s"), Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_parse_minutes_and_hours() {
        assert_eq!(parse_duration_str("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration_str("1h"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_parse_plain_number() {
        assert_eq!(
            parse_duration_str("1000"),
            Some(Duration::from_millis(1000))
        );
    }

    #[test]
    fn test_parse_with_whitespace() {
        assert_eq!(parse_duration_str(" 30s "), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_parse_fractional() {
        assert_eq!(
            parse_duration_str("1.5s"),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(parse_duration_str("0.5m"), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(parse_duration_str("invalid"), None);
        assert_eq!(parse_duration_str("abc123"), None);
        assert_eq!(parse_duration_str(""), None);
    }

    #[test]
    fn test_negative_durations_are_rejected() {
        assert_eq!(parse_duration_str("-5s"), None);
        assert_eq!(parse_duration_str("-100ms"), None);
        let err = parse_duration("stages[0].duration", "-5s").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration { .. }));
    }

    #[test]
    fn test_parse_duration_or_default() {
        let d = parse_duration_or("tick", None, Duration::from_millis(100)).unwrap();
        assert_eq!(d, Duration::from_millis(100));
        let d = parse_duration_or("tick", Some("1s"), Duration::from_millis(100)).unwrap();
        assert_eq!(d, Duration::from_secs(1));
    }
}
