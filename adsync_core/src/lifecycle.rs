//! Beginning-of-life / end-of-life inference from status and time fields.

use crate::entity::record::EntityRecord;
use crate::entity::types::EntityDescriptor;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;

/// Status fields consulted for terminal detection, highest priority first.
pub const STATUS_FIELDS: [&str; 3] = ["configured_status", "effective_status", "status"];

/// Irreversible terminal statuses.
pub const TERMINAL_STATUSES: [&str; 2] = ["ARCHIVED", "DELETED"];

/// Candidate lifecycle bounds. Both are merged set-if-absent at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lifecycle {
    pub bol: Option<DateTime<Utc>>,
    pub eol: Option<DateTime<Utc>>,
}

pub fn infer_lifecycle(
    record: &EntityRecord,
    descriptor: &EntityDescriptor,
    now: DateTime<Utc>,
) -> Lifecycle {
    let created = record.get_present(descriptor.created_time_field);
    let bol = match created {
        Some(value) => parse_timestamp(value),
        None if descriptor.default_bol_if_absent => Some(now),
        None => None,
    };

    let eol = if is_terminal(record) {
        record
            .get_present(descriptor.updated_time_field)
            .and_then(parse_timestamp)
    } else {
        None
    };

    Lifecycle { bol, eol }
}

/// Status value that decides terminality: the first status field that is present.
pub fn resolved_status(record: &EntityRecord) -> Option<String> {
    STATUS_FIELDS
        .iter()
        .find_map(|field| record.get_present(field))
        .map(|value| match value {
            Value::String(s) => s.trim().to_string(),
            other => other.to_string(),
        })
}

pub fn is_terminal(record: &EntityRecord) -> bool {
    resolved_status(record).is_some_and(|status| {
        TERMINAL_STATUSES
            .iter()
            .any(|terminal| terminal.eq_ignore_ascii_case(&status))
    })
}

/// Parse a timestamp-like value into UTC.
///
/// Accepts RFC 3339, ISO-8601 with `+hhmm` offsets, naive date-times (taken as UTC) and
/// unix seconds. Anything else is treated as "no signal".
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let parsed = match value {
        Value::String(s) => parse_timestamp_str(s.trim()),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .or_else(|| {
                let secs = n.as_f64()?;
                let millis = (secs * 1000.0).round() as i64;
                Utc.timestamp_millis_opt(millis).single()
            }),
        _ => None,
    };
    if parsed.is_none() {
        tracing::debug!(value = %value, "unparsable timestamp treated as absent");
    }
    parsed
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%dT%H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Storage form of a timestamp: UTC, whole seconds, `Z` suffix.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::types::EntityType;
    use serde_json::json;

    fn record(value: Value) -> EntityRecord {
        EntityRecord::try_from(value).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn archived_campaign_gets_bol_and_eol_in_utc() {
        let rec = record(json!({
            "id": "123",
            "account_id": "456",
            "created_time": "2018-02-14T16:33:19-0800",
            "effective_status": "ARCHIVED",
            "updated_time": "2018-02-17T16:33:19-0800",
        }));
        let lc = infer_lifecycle(&rec, EntityType::Campaign.descriptor(), now());
        assert_eq!(lc.bol.map(format_timestamp).as_deref(), Some("2018-02-15T00:33:19Z"));
        assert_eq!(lc.eol.map(format_timestamp).as_deref(), Some("2018-02-18T00:33:19Z"));
    }

    #[test]
    fn active_entity_has_no_eol() {
        let rec = record(json!({
            "created_time": "2018-02-14T16:33:19+00:00",
            "effective_status": "ACTIVE",
            "updated_time": "2018-02-17T16:33:19+00:00",
        }));
        let lc = infer_lifecycle(&rec, EntityType::Ad.descriptor(), now());
        assert!(lc.bol.is_some());
        assert_eq!(lc.eol, None);
    }

    #[test]
    fn terminal_without_update_time_has_no_eol() {
        let rec = record(json!({"status": "DELETED"}));
        assert!(is_terminal(&rec));
        let lc = infer_lifecycle(&rec, EntityType::Ad.descriptor(), now());
        assert_eq!(lc, Lifecycle::default());
    }

    #[test]
    fn configured_status_takes_priority() {
        let rec = record(json!({
            "configured_status": "PAUSED",
            "effective_status": "ARCHIVED",
            "updated_time": "2018-02-17T16:33:19Z",
        }));
        assert_eq!(resolved_status(&rec).as_deref(), Some("PAUSED"));
        assert!(!is_terminal(&rec));

        let rec = record(json!({
            "configured_status": null,
            "effective_status": "archived",
            "updated_time": "2018-02-17T16:33:19Z",
        }));
        assert!(is_terminal(&rec));
    }

    #[test]
    fn default_bol_applies_only_when_creation_time_is_absent() {
        let page = EntityType::Page.descriptor();
        let lc = infer_lifecycle(&record(json!({"id": "p1"})), page, now());
        assert_eq!(lc.bol, Some(now()));

        let lc = infer_lifecycle(
            &record(json!({"id": "p1", "created_time": "garbage"})),
            page,
            now(),
        );
        assert_eq!(lc.bol, None);

        let campaign = EntityType::Campaign.descriptor();
        let lc = infer_lifecycle(&record(json!({"id": "c1"})), campaign, now());
        assert_eq!(lc.bol, None);
    }

    #[test]
    fn custom_audiences_use_their_own_time_fields() {
        let rec = record(json!({
            "time_created": 1518654799,
            "time_updated": 1518913999,
            "operation_status": null,
            "status": "DELETED",
        }));
        let lc = infer_lifecycle(&rec, EntityType::CustomAudience.descriptor(), now());
        assert_eq!(lc.bol.map(format_timestamp).as_deref(), Some("2018-02-15T00:33:19Z"));
        assert_eq!(lc.eol.map(format_timestamp).as_deref(), Some("2018-02-18T00:33:19Z"));
    }

    #[test]
    fn parses_supported_timestamp_shapes() {
        let expected = Utc.with_ymd_and_hms(2018, 2, 15, 0, 33, 19).unwrap();
        for raw in [
            json!("2018-02-15T00:33:19Z"),
            json!("2018-02-14T16:33:19-08:00"),
            json!("2018-02-14T16:33:19-0800"),
            json!("2018-02-15T00:33:19"),
            json!("2018-02-15 00:33:19"),
            json!(1518654799),
        ] {
            assert_eq!(parse_timestamp(&raw), Some(expected), "{raw}");
        }
        assert_eq!(parse_timestamp(&json!("not a date")), None);
        assert_eq!(parse_timestamp(&json!(true)), None);
    }
}
