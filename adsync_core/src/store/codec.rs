//! Abbreviated attribute names for storage.
//!
//! Known canonical names map to short wire names. Any other name passes through as-is,
//! unless it would be mistaken for a wire name (or starts with the escape marker), in which
//! case it is stored with a `~` prefix. Decoding reverses both rules, so every name
//! round-trips.

use serde_json::{Map, Value};

const ESCAPE: char = '~';

/// `(canonical, wire)` pairs. Both columns must be unique.
const ABBREVIATIONS: [(&str, &str); 10] = [
    ("entity_id", "eid"),
    ("scope_id", "sid"),
    ("account_id", "aid"),
    ("page_id", "pid"),
    ("hash", "h"),
    ("hash_fields", "hf"),
    ("is_active", "act"),
    ("is_accessible", "acc"),
    ("timezone", "tz"),
    ("name", "n"),
];

pub fn encode_name(canonical: &str) -> String {
    if let Some((_, wire)) = ABBREVIATIONS.iter().find(|(c, _)| *c == canonical) {
        return (*wire).to_string();
    }
    let collides = ABBREVIATIONS.iter().any(|(_, w)| *w == canonical);
    if collides || canonical.starts_with(ESCAPE) {
        return format!("{ESCAPE}{canonical}");
    }
    canonical.to_string()
}

pub fn decode_name(wire: &str) -> String {
    if let Some(escaped) = wire.strip_prefix(ESCAPE) {
        return escaped.to_string();
    }
    ABBREVIATIONS
        .iter()
        .find(|(_, w)| *w == wire)
        .map(|(c, _)| (*c).to_string())
        .unwrap_or_else(|| wire.to_string())
}

pub fn encode_attributes(attributes: &Map<String, Value>) -> Map<String, Value> {
    attributes
        .iter()
        .map(|(k, v)| (encode_name(k), v.clone()))
        .collect()
}

pub fn decode_attributes(attributes: Map<String, Value>) -> Map<String, Value> {
    attributes
        .into_iter()
        .map(|(k, v)| (decode_name(&k), v))
        .collect()
}
