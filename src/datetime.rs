//! Datetime parsing and formatting helpers
//!
//! Cursor values and interpolation macros carry datetimes as strings. These
//! helpers parse the common shapes, honour manifest `datetime_format`
//! strings (including `%s` / `%ms` epoch formats and `%f` microseconds),
//! and parse step durations in either ISO 8601 (`P1D`, `PT12H`) or short
//! form (`1d`, `2h`).

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// Default rendering for datetimes produced by macros
pub fn to_iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse a datetime string in any of the commonly seen shapes
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Ok(dt.with_timezone(&Utc));
        }
    }

    let formats = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d",
        "%Y/%m/%d",
    ];

    for fmt in formats {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
        if let Ok(nd) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&nd.and_time(chrono::NaiveTime::MIN)));
        }
    }

    if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
        if let Some(dt) = s.parse::<i64>().ok().and_then(from_epoch_seconds) {
            return Ok(dt);
        }
    }

    Err(Error::config(format!("Invalid datetime format: {s}")))
}

/// Parse a datetime with an explicit manifest format
pub fn parse_with_format(s: &str, format: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    match format {
        "%s" => s
            .parse::<f64>()
            .ok()
            .and_then(|secs| from_epoch_seconds(secs as i64))
            .ok_or_else(|| Error::config(format!("Invalid epoch seconds: {s}"))),
        "%ms" => s
            .parse::<i64>()
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| Error::config(format!("Invalid epoch milliseconds: {s}"))),
        _ => {
            let fmt = manifest_format_to_chrono(format);
            if let Ok(dt) = DateTime::parse_from_str(s, &fmt) {
                return Ok(dt.with_timezone(&Utc));
            }
            if let Ok(ndt) = NaiveDateTime::parse_from_str(s, &fmt) {
                return Ok(Utc.from_utc_datetime(&ndt));
            }
            if let Ok(nd) = NaiveDate::parse_from_str(s, &fmt) {
                return Ok(Utc.from_utc_datetime(&nd.and_time(chrono::NaiveTime::MIN)));
            }
            Err(Error::config(format!(
                "Datetime '{s}' does not match format '{format}'"
            )))
        }
    }
}

/// Format a datetime with a manifest format
pub fn format_datetime(dt: DateTime<Utc>, format: &str) -> String {
    match format {
        "%s" => dt.timestamp().to_string(),
        "%ms" => dt.timestamp_millis().to_string(),
        _ => dt.format(&manifest_format_to_chrono(format)).to_string(),
    }
}

fn from_epoch_seconds(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Translate the strftime dialect used in manifests to chrono's.
/// Only `%f` differs: microseconds there, nanoseconds in chrono.
fn manifest_format_to_chrono(format: &str) -> String {
    let mut out = String::with_capacity(format.len() + 2);
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '%' {
            match chars.next() {
                Some('f') => out.push_str("%6f"),
                Some(other) => {
                    out.push('%');
                    out.push(other);
                }
                None => out.push('%'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Parse a step duration: ISO 8601 (`P1D`, `PT1H30M`, `P2W`) or short form (`1d`, `12h`)
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix('P') {
        return parse_iso_duration(rest).ok_or_else(|| Error::config(format!("Invalid duration: {s}")));
    }

    let (num_str, suffix) = if let Some(stripped) = s.strip_suffix('d') {
        (stripped, 'd')
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, 'h')
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, 'm')
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, 's')
    } else if let Some(stripped) = s.strip_suffix('w') {
        (stripped, 'w')
    } else {
        (s, 'd')
    };

    let num: i64 = num_str
        .parse()
        .map_err(|_| Error::config(format!("Invalid duration number: {num_str}")))?;

    Ok(match suffix {
        'w' => Duration::weeks(num),
        'h' => Duration::hours(num),
        'm' => Duration::minutes(num),
        's' => Duration::seconds(num),
        _ => Duration::days(num),
    })
}

// Years and months are approximated as 365 and 30 days.
fn parse_iso_duration(rest: &str) -> Option<Duration> {
    let mut total = Duration::zero();
    let mut in_time = false;
    let mut number = String::new();
    let mut seen_component = false;

    for c in rest.chars() {
        match c {
            'T' => {
                if !number.is_empty() {
                    return None;
                }
                in_time = true;
            }
            '0'..='9' | '.' => number.push(c),
            unit => {
                let value: f64 = number.parse().ok()?;
                number.clear();
                seen_component = true;
                let millis = match (in_time, unit) {
                    (false, 'Y') => value * 365.0 * 86_400_000.0,
                    (false, 'M') => value * 30.0 * 86_400_000.0,
                    (false, 'W') => value * 7.0 * 86_400_000.0,
                    (false, 'D') => value * 86_400_000.0,
                    (true, 'H') => value * 3_600_000.0,
                    (true, 'M') => value * 60_000.0,
                    (true, 'S') => value * 1000.0,
                    _ => return None,
                };
                total += Duration::milliseconds(millis as i64);
            }
        }
    }

    if !number.is_empty() || !seen_component {
        return None;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("2024-01-15T10:30:00Z", "2024-01-15T10:30:00Z" ; "rfc3339")]
    #[test_case("2024-01-15 10:30:00+00:00", "2024-01-15T10:30:00Z" ; "space separated with offset")]
    #[test_case("2024-01-15T10:30:00.123456", "2024-01-15T10:30:00.123456Z" ; "naive with fraction")]
    #[test_case("2024-01-15", "2024-01-15T00:00:00Z" ; "date only")]
    #[test_case("1705314600", "2024-01-15T10:30:00Z" ; "epoch seconds")]
    fn test_parse_datetime(input: &str, expected: &str) {
        assert_eq!(to_iso(parse_datetime(input).unwrap()), expected);
    }

    #[test]
    fn test_parse_datetime_invalid() {
        assert!(parse_datetime("not a date").is_err());
    }

    #[test]
    fn test_format_roundtrip_with_manifest_format() {
        let dt = parse_with_format("2024-03-01T12:00:00.000001+0000", "%Y-%m-%dT%H:%M:%S.%f%z").unwrap();
        assert_eq!(
            format_datetime(dt, "%Y-%m-%dT%H:%M:%S.%f%z"),
            "2024-03-01T12:00:00.000001+0000"
        );
    }

    #[test]
    fn test_epoch_formats() {
        let dt = parse_with_format("1700000000", "%s").unwrap();
        assert_eq!(format_datetime(dt, "%s"), "1700000000");
        assert_eq!(format_datetime(dt, "%ms"), "1700000000000");
        assert_eq!(format_datetime(dt, "%Y-%m-%d"), "2023-11-14");
    }

    #[test_case("P1D", Duration::days(1))]
    #[test_case("PT12H", Duration::hours(12))]
    #[test_case("P1DT6H", Duration::hours(30))]
    #[test_case("P2W", Duration::weeks(2))]
    #[test_case("PT0.5S", Duration::milliseconds(500))]
    #[test_case("30m", Duration::minutes(30))]
    #[test_case("7", Duration::days(7))]
    fn test_parse_duration(input: &str, expected: Duration) {
        assert_eq!(parse_duration(input).unwrap(), expected);
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("P").is_err());
        assert!(parse_duration("PT1X").is_err());
        assert!(parse_duration("abc").is_err());
    }
}
