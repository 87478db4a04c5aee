//! Flexible time parser for replay positions and intervals.
//!
//! Supports multiple formats:
//! - ISO 8601: `2026-02-07T17:00:00`, `2026-02-07T17:00:00.250Z`
//! - Unix timestamp: `1738944000`, `1738944000.5`
//! - Relative: `-1h`, `-30m`, `-2d`
//! - Date+time (UTC): `2026-02-07:07:00` or `2026-02-07:07:00:00`
//! - Time only (UTC): `07:00`

use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::model::Timestamp;

/// Error type for time parsing failures.
#[derive(Debug, Clone)]
pub struct TimeParseError {
    pub input: String,
    pub message: String,
}

impl std::fmt::Display for TimeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse time '{}': {}", self.input, self.message)
    }
}

impl std::error::Error for TimeParseError {}

impl TimeParseError {
    fn new(input: &str, message: &str) -> Self {
        Self {
            input: input.to_string(),
            message: message.to_string(),
        }
    }
}

const UNRECOGNIZED: &str = "Unrecognized format. Use: ISO 8601 (2026-02-07T17:00:00), \
                            Unix timestamp (1738944000), relative (-1h, -30m, -2d), \
                            date:time (2026-02-07:07:00), or time only (07:00)";

/// Parse a flexible time string; relative and time-only forms are taken
/// against the wall clock.
///
/// # Supported formats
///
/// | Format | Example | Description |
/// |--------|---------|-------------|
/// | ISO 8601 | `2026-02-07T17:00:00` | Full datetime, optional fraction/offset |
/// | Unix timestamp | `1738944000.5` | Seconds since epoch |
/// | Relative | `-1h`, `-30m`, `-2d` | Relative to now |
/// | Date+time | `2026-02-07:07:00` | UTC, colon separator |
/// | Date+time+sec | `2026-02-07:07:00:00` | UTC, with seconds |
/// | Time only | `07:00` | Current day, UTC |
pub fn parse_time(input: &str) -> Result<Timestamp, TimeParseError> {
    parse_time_with_base(input, Timestamp::now())
}

/// Parses a time expression in UTC using `base` as a reference.
///
/// Relative time (`-1h`, `-30m`, ...) is taken from `base`; time only
/// (`HH:MM`) is that time on the day of `base`. Replay tools pass the
/// archive start here.
pub fn parse_time_with_base(input: &str, base: Timestamp) -> Result<Timestamp, TimeParseError> {
    let input = input.trim();

    if let Some(ts) = try_parse_unix_timestamp(input) {
        return Ok(ts);
    }

    if let Some(delta_secs) = try_parse_relative_delta_seconds(input) {
        return base
            .sec
            .checked_add(delta_secs)
            .map(|sec| Timestamp::new(sec, base.nsec))
            .ok_or_else(|| TimeParseError::new(input, "Relative time overflow"));
    }

    if let Some(ts) = try_parse_iso8601(input) {
        return Ok(ts);
    }

    if let Some(ts) = try_parse_date_colon_time(input) {
        return Ok(ts);
    }

    if let Some(ts) = try_parse_time_only_on_base_date(input, base) {
        return Ok(ts);
    }

    Err(TimeParseError::new(input, UNRECOGNIZED))
}

/// Parses a replay step: bare seconds (`10`, `0.5`) or a number with a
/// unit suffix (`250ms`, `10s`, `5m`, `1h`, `1d`). Zero is rejected.
pub fn parse_interval(input: &str) -> Result<Duration, TimeParseError> {
    let input = input.trim();
    let bad = |message: &str| TimeParseError::new(input, message);

    let (number, scale_ns) = if let Some(n) = input.strip_suffix("ms") {
        (n, 1_000_000.0)
    } else if let Some(n) = input.strip_suffix('s') {
        (n, 1e9)
    } else if let Some(n) = input.strip_suffix('m') {
        (n, 60e9)
    } else if let Some(n) = input.strip_suffix('h') {
        (n, 3600e9)
    } else if let Some(n) = input.strip_suffix('d') {
        (n, 86400e9)
    } else {
        (input, 1e9)
    };

    let value: f64 = number
        .parse()
        .map_err(|_| bad("Expected a number with optional ms/s/m/h/d suffix"))?;
    let nanos = value * scale_ns;
    if !nanos.is_finite() || nanos < 1.0 || nanos > i64::MAX as f64 {
        return Err(bad("Interval must be positive"));
    }
    Ok(Duration::from_nanos(nanos.round() as u64))
}

/// Try to parse as Unix timestamp: digits with an optional fraction.
fn try_parse_unix_timestamp(input: &str) -> Option<Timestamp> {
    let (whole, frac) = input.split_once('.').unwrap_or((input, ""));
    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if frac.len() > 9 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let sec = whole.parse::<i64>().ok()?;
    let nsec = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<9}").parse::<u32>().ok()?
    };
    Some(Timestamp::new(sec, nsec))
}

/// Parses relative expression and returns delta seconds (negative value).
fn try_parse_relative_delta_seconds(input: &str) -> Option<i64> {
    let rest = input.strip_prefix('-')?;
    let unit = rest.chars().last()?;
    let number_str = &rest[..rest.len() - unit.len_utf8()];
    if number_str.is_empty() {
        return None;
    }
    let number: i64 = number_str.parse().ok()?;

    let seconds = match unit {
        's' => number,
        'm' => number.checked_mul(60)?,
        'h' => number.checked_mul(3600)?,
        'd' => number.checked_mul(86400)?,
        'w' => number.checked_mul(604800)?,
        _ => return None,
    };

    Some(-seconds)
}

fn from_utc(datetime: &NaiveDateTime) -> Timestamp {
    let dt = Utc.from_utc_datetime(datetime);
    Timestamp::new(dt.timestamp(), dt.timestamp_subsec_nanos())
}

/// Try to parse as ISO 8601 datetime.
fn try_parse_iso8601(input: &str) -> Option<Timestamp> {
    if !input.contains('T') {
        return None;
    }

    // With timezone
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        let dt = dt.with_timezone(&Utc);
        return Some(Timestamp::new(dt.timestamp(), dt.timestamp_subsec_nanos()));
    }

    // No timezone, assume UTC
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .map(|ndt| from_utc(&ndt))
}

/// Try to parse as date:time format (2026-02-07:07:00 or 2026-02-07:07:00:00).
fn try_parse_date_colon_time(input: &str) -> Option<Timestamp> {
    // YYYY-MM-DD is 10 chars, then ':' separates date from time
    if !input.contains('-') || input.len() < 11 || !input.is_char_boundary(10) {
        return None;
    }

    let (date_part, rest) = input.split_at(10);
    let time_part = rest.strip_prefix(':')?;

    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    let time = match time_part.len() {
        5 => NaiveTime::parse_from_str(time_part, "%H:%M").ok()?,
        8 => NaiveTime::parse_from_str(time_part, "%H:%M:%S").ok()?,
        _ => return None,
    };

    Some(from_utc(&NaiveDateTime::new(date, time)))
}

fn try_parse_time_only_on_base_date(input: &str, base: Timestamp) -> Option<Timestamp> {
    if input.len() != 5 || input.chars().nth(2) != Some(':') {
        return None;
    }

    let time = NaiveTime::parse_from_str(input, "%H:%M").ok()?;
    let base_dt = Utc.timestamp_opt(base.sec, 0).single()?;
    Some(from_utc(&NaiveDateTime::new(base_dt.date_naive(), time)))
}

/// Step length in nanoseconds for interpolated replay.
pub fn interval_nanos(step: Duration) -> i64 {
    i64::try_from(step.as_nanos()).unwrap_or(i64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> Timestamp {
        let dt = Utc.with_ymd_and_hms(y, mo, d, h, mi, s).single().unwrap();
        Timestamp::from_secs(dt.timestamp())
    }

    #[test]
    fn test_unix_timestamp() {
        assert_eq!(parse_time("1738944000").unwrap(), Timestamp::from_secs(1738944000));
        assert_eq!(parse_time("0").unwrap(), Timestamp::from_secs(0));
        assert_eq!(
            parse_time("1738944000.25").unwrap(),
            Timestamp::new(1738944000, 250_000_000)
        );
        assert!(parse_time("1738944000.").is_ok());
        assert!(parse_time("1.0000000001").is_err());
    }

    #[test]
    fn test_relative_time() {
        let now = Timestamp::now().sec;

        let ts = parse_time("-1h").unwrap();
        assert!((ts.sec - (now - 3600)).abs() < 2);

        let ts = parse_time("-30m").unwrap();
        assert!((ts.sec - (now - 1800)).abs() < 2);

        let ts = parse_time("-2d").unwrap();
        assert!((ts.sec - (now - 172800)).abs() < 2);

        let ts = parse_time("-1w").unwrap();
        assert!((ts.sec - (now - 604800)).abs() < 2);
    }

    #[test]
    fn test_iso8601() {
        let expected = utc(2026, 2, 7, 17, 0, 0);
        assert_eq!(parse_time("2026-02-07T17:00:00").unwrap(), expected);
        assert_eq!(parse_time("2026-02-07T17:00").unwrap(), expected);
        assert_eq!(parse_time("2026-02-07T19:00:00+02:00").unwrap(), expected);
        assert_eq!(
            parse_time("2026-02-07T17:00:00.5").unwrap(),
            Timestamp::new(expected.sec, 500_000_000)
        );
    }

    #[test]
    fn test_date_colon_time() {
        let expected = utc(2026, 2, 7, 17, 0, 0);
        assert_eq!(parse_time("2026-02-07:17:00").unwrap(), expected);
        assert_eq!(parse_time("2026-02-07:17:00:00").unwrap(), expected);
    }

    #[test]
    fn test_invalid_formats() {
        assert!(parse_time("").is_err());
        assert!(parse_time("invalid").is_err());
        assert!(parse_time("2026-02-07").is_err()); // date only, no time
        assert!(parse_time("-abc").is_err());
        assert!(parse_time("12:34:56:78").is_err());
        assert!(parse_time("-9999999999999999w").is_err());
    }

    #[test]
    fn test_parse_time_with_base_relative_and_time_only() {
        let base = utc(2026, 2, 8, 10, 0, 0);
        assert_eq!(
            parse_time_with_base("-1h", base).unwrap(),
            Timestamp::from_secs(base.sec - 3600)
        );
        assert_eq!(
            parse_time_with_base("16:00", base).unwrap(),
            utc(2026, 2, 8, 16, 0, 0)
        );
    }

    #[test]
    fn test_intervals() {
        assert_eq!(parse_interval("10").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_interval("0.5").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_interval("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_interval("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_interval("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_interval("0").is_err());
        assert!(parse_interval("-5s").is_err());
        assert!(parse_interval("fast").is_err());
        assert_eq!(interval_nanos(Duration::from_secs(10)), 10_000_000_000);
    }
}
