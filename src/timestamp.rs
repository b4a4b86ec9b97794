use crate::error::IngestError;
use chrono::{DateTime, FixedOffset, TimeZone};
use serde_json::Value as JsonValue;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// Parses a configured UTC offset: `±HH:MM`, `±HHMM`, `±HH` or `Z`.
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset, String> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0).ok_or_else(|| "zero offset rejected".to_string());
    }

    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'+') => (1, &trimmed[1..]),
        Some(b'-') => (-1, &trimmed[1..]),
        _ => return Err(format!("{trimmed:?} must start with '+' or '-'")),
    };
    if !rest.is_ascii() {
        return Err(format!("{trimmed:?} is not in ±HH:MM form"));
    }
    let (hours, minutes) = match rest.len() {
        2 => (rest, "00"),
        4 => (&rest[..2], &rest[2..]),
        5 if rest.as_bytes()[2] == b':' => (&rest[..2], &rest[3..]),
        _ => return Err(format!("{trimmed:?} is not in ±HH:MM form")),
    };
    if !hours.bytes().chain(minutes.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(format!("{trimmed:?} is not in ±HH:MM form"));
    }
    let hours: i32 = hours.parse().map_err(|_| format!("bad hours in {trimmed:?}"))?;
    let minutes: i32 = minutes
        .parse()
        .map_err(|_| format!("bad minutes in {trimmed:?}"))?;
    if hours > 23 || minutes > 59 {
        return Err(format!("{trimmed:?} is out of range"));
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| format!("{trimmed:?} is out of range"))
}

/// Pins `location.localtime_epoch` to the deployment's fixed offset. The epoch
/// is an absolute instant; only the rendered wall clock depends on `offset`.
pub fn normalize(
    epoch: Option<&JsonValue>,
    offset: FixedOffset,
) -> Result<DateTime<FixedOffset>, IngestError> {
    let Some(epoch) = epoch.filter(|value| !value.is_null()) else {
        return Err(IngestError::MalformedResponse(
            "location.localtime_epoch is missing".to_string(),
        ));
    };
    let secs = epoch.as_i64().ok_or_else(|| {
        IngestError::MalformedResponse(format!(
            "location.localtime_epoch is not an integer: {epoch}"
        ))
    })?;
    offset.timestamp_opt(secs, 0).single().ok_or_else(|| {
        IngestError::MalformedResponse(format!(
            "location.localtime_epoch {secs} is out of range"
        ))
    })
}

pub fn format_timestamp(timestamp: &DateTime<FixedOffset>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn offset(raw: &str) -> FixedOffset {
        parse_utc_offset(raw).expect("offset")
    }

    #[test]
    fn renders_epoch_at_configured_offset() {
        let ts = normalize(Some(&json!(1614600000)), offset("+02:00")).unwrap();
        assert_eq!(format_timestamp(&ts), "2021-03-01T14:00:00+02:00");
        assert_eq!(ts.timestamp(), 1614600000);
    }

    #[test]
    fn same_epoch_renders_per_offset_without_shifting_the_instant() {
        let epoch = json!(1614600000);
        let utc = normalize(Some(&epoch), offset("Z")).unwrap();
        let india = normalize(Some(&epoch), offset("+05:30")).unwrap();
        let west = normalize(Some(&epoch), offset("-0800")).unwrap();

        assert_eq!(format_timestamp(&utc), "2021-03-01T12:00:00+00:00");
        assert_eq!(format_timestamp(&india), "2021-03-01T17:30:00+05:30");
        assert_eq!(format_timestamp(&west), "2021-03-01T04:00:00-08:00");
        assert_eq!(utc, india);
        assert_eq!(india, west);
    }

    #[test]
    fn parses_offset_forms() {
        assert_eq!(offset("+02:00").local_minus_utc(), 7200);
        assert_eq!(offset("+0200").local_minus_utc(), 7200);
        assert_eq!(offset("+02").local_minus_utc(), 7200);
        assert_eq!(offset(" -03:30 ").local_minus_utc(), -12600);
        assert_eq!(offset("z").local_minus_utc(), 0);
    }

    #[test]
    fn rejects_bad_offsets() {
        for raw in ["", "02:00", "+2:00", "+24:00", "+02:60", "+0a:00", "UTC", "+02-00"] {
            assert!(parse_utc_offset(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn rejects_missing_or_invalid_epoch() {
        let tz = offset("+02:00");
        for epoch in [None, Some(json!(null)), Some(json!("1614600000")), Some(json!(1.5))] {
            let err = normalize(epoch.as_ref(), tz).unwrap_err();
            assert!(matches!(err, IngestError::MalformedResponse(_)));
        }
        let err = normalize(Some(&json!(i64::MAX)), tz).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }
}
