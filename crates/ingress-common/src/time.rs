//! Timestamp handling shared by the ingress pipeline and the station sync.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use thiserror::Error;

/// Format an instant the way envelopes carry it.
///
/// Always UTC, always millisecond precision, always a `Z` suffix, so two
/// envelopes built from the same instant serialize identically.
pub fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a provider-supplied timestamp.
///
/// Accepts, in order:
/// - RFC 3339 with offset: "2024-01-15T12:00:00+01:00"
/// - Naive datetime (assumed UTC): "2024-01-15T12:00:00"
/// - Date only (midnight UTC): "2024-01-15"
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, TimeParseError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(ndt) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    Err(TimeParseError::InvalidFormat(s.to_string()))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeParseError {
    #[error("Invalid time format: {0}")]
    InvalidFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_instant_fixed_precision() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(format_instant(&dt), "2024-01-15T12:00:00.000Z");
    }

    #[test]
    fn test_format_instant_truncates_to_millis() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        assert_eq!(format_instant(&dt), "2024-01-15T12:00:00.123Z");
    }

    #[test]
    fn test_parse_rfc3339_with_offset() {
        let dt = parse_timestamp("2024-01-15T13:00:00+01:00").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_naive_as_utc() {
        let dt = parse_timestamp("2024-01-15T12:30:00").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 1, 15, 12, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_date_only() {
        let dt = parse_timestamp("2024-01-15").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(TimeParseError::InvalidFormat(_))
        ));
    }
}
