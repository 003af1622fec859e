//! Lenient timestamp parsing for text produced by the completion tool.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Parse an ISO 8601 timestamp.
///
/// Accepts RFC 3339 with an offset, a naive date-time (interpreted in local
/// time) or a bare date (UTC midnight). Returns `None` for anything else,
/// including blank input.
#[must_use]
pub fn parse_timestamp(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return local_to_utc(naive);
        }
    }

    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Like [`parse_timestamp`] but for an optional field.
#[must_use]
pub fn parse_optional(input: Option<&str>) -> Option<DateTime<Utc>> {
    input.and_then(parse_timestamp)
}

fn local_to_utc(naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    // A skipped local time (DST gap) has no instant; an ambiguous one takes the earlier.
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc3339_with_offset() {
        let dt = parse_timestamp("2026-03-01T10:00:00+09:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-03-01T01:00:00+00:00");
    }

    #[test]
    fn test_zulu_and_fraction() {
        assert!(parse_timestamp("2026-03-01T10:00:00.250Z").is_some());
    }

    #[test]
    fn test_naive_forms_are_accepted() {
        assert!(parse_timestamp("2026-03-01T10:00:00").is_some());
        assert!(parse_timestamp("2026-03-01T10:00").is_some());
        assert!(parse_timestamp("2026-03-01 10:00").is_some());
    }

    #[test]
    fn test_bare_date_is_utc_midnight() {
        let dt = parse_timestamp("2026-03-01").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-03-01T00:00:00+00:00");
    }

    #[test]
    fn test_invalid_input() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("   ").is_none());
        assert!(parse_timestamp("next tuesday").is_none());
        assert!(parse_timestamp("2026-13-01").is_none());
        assert!(parse_optional(None).is_none());
    }
}
