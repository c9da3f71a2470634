//! Time rules: TTL strings, absolute expiry timestamps, and human-readable durations.

use std::fmt::Write as _;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::FormatError;

/// TTL value meaning "never expires".
pub const TTL_FOREVER: &str = "forever";

static TTL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)([smhdw])$").expect("TTL pattern is valid"));

// chrono durations are bounded by i64 milliseconds.
const MAX_TTL_SECONDS: i64 = i64::MAX / 1000;

const UNITS: [(i64, char); 5] = [
    (7 * 24 * 3600, 'w'),
    (24 * 3600, 'd'),
    (3600, 'h'),
    (60, 'm'),
    (1, 's'),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    Forever,
    Finite(Duration),
}

impl Ttl {
    /// Expiry instant when counting from `start`; `None` for `forever` (or an
    /// instant beyond the representable range).
    pub fn expires_at(self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Ttl::Forever => None,
            Ttl::Finite(d) => start.checked_add_signed(d),
        }
    }
}

/// Parse `<integer><unit>` with unit in `s m h d w`, or the literal `forever`.
pub fn parse_ttl(s: &str) -> Result<Ttl, FormatError> {
    if s == TTL_FOREVER {
        return Ok(Ttl::Forever);
    }
    let invalid = || FormatError::Ttl(s.to_string());
    let caps = TTL_PATTERN.captures(s).ok_or_else(invalid)?;
    let value: i64 = caps[1].parse().map_err(|_| invalid())?;
    let unit = caps[2].chars().next().ok_or_else(invalid)?;
    let size = UNITS
        .iter()
        .find(|(_, suffix)| *suffix == unit)
        .map(|(size, _)| *size)
        .ok_or_else(invalid)?;
    let secs = value
        .checked_mul(size)
        .filter(|secs| *secs <= MAX_TTL_SECONDS)
        .ok_or_else(invalid)?;
    Ok(Ttl::Finite(Duration::seconds(secs)))
}

/// Parse an absolute expiry: RFC 3339, `YYYY-MM-DDTHH:MM` or `YYYY-MM-DD` (UTC), in that order.
pub fn parse_expiry(s: &str) -> Result<DateTime<Utc>, FormatError> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M") {
        return Ok(Utc.from_utc_datetime(&t));
    }
    if let Some(t) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(Utc.from_utc_datetime(&t));
    }
    Err(FormatError::Expiry(s.to_string()))
}

/// Render largest unit first, e.g. 5400s -> `1h30m`; zero is `0s`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.num_seconds();
    if secs < 0 {
        return format!("-{}", render_seconds(secs.unsigned_abs()));
    }
    render_seconds(secs.unsigned_abs())
}

fn render_seconds(mut secs: u64) -> String {
    let mut out = String::new();
    for (size, suffix) in UNITS {
        let size = size as u64;
        let n = secs / size;
        if n > 0 {
            let _ = write!(out, "{}{}", n, suffix);
            secs %= size;
        }
    }
    if out.is_empty() {
        "0s".to_string()
    } else {
        out
    }
}
