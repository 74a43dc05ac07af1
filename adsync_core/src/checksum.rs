//! Field-selective change detection.
//!
//! Two tokens are produced per record:
//! - `data_hash` covers the considered field names together with their normalized values,
//! - `fields_hash` covers only the considered field names, so a change of shape
//!   (fields appearing or disappearing) is visible separately from a change of value.
//!
//! Field order in the input never matters: names are sorted before hashing and nested
//! mappings are rendered with sorted keys.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use xxhash_rust::xxh64::Xxh64;

const HASH_SEED: u64 = 0;
const NAME_SEP: u8 = 0x1f;
const FIELD_SEP: u8 = 0x1e;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    pub data_hash: String,
    pub fields_hash: String,
}

/// Checksum `record`, restricted to `selected` field names when given.
///
/// Selected names absent from the record are ignored, as are duplicates.
pub fn checksum(record: &Map<String, Value>, selected: Option<&[&str]>) -> Checksum {
    let names: BTreeSet<&str> = match selected {
        Some(selected) => selected
            .iter()
            .copied()
            .filter(|name| record.contains_key(*name))
            .collect(),
        None => record.keys().map(String::as_str).collect(),
    };

    let mut data = Xxh64::new(HASH_SEED);
    let mut shape = Xxh64::new(HASH_SEED);
    for name in &names {
        shape.update(name.as_bytes());
        shape.update(&[FIELD_SEP]);

        data.update(name.as_bytes());
        data.update(&[NAME_SEP]);
        if let Some(value) = record.get(*name) {
            data.update(normalize_value(value).as_bytes());
        }
        data.update(&[FIELD_SEP]);
    }

    Checksum {
        data_hash: format!("{:016x}", data.digest()),
        fields_hash: format!("{:016x}", shape.digest()),
    }
}

/// Checksum every field except `excluded`.
pub fn checksum_excluding(record: &Map<String, Value>, excluded: &[&str]) -> Checksum {
    let selected: Vec<&str> = record
        .keys()
        .map(String::as_str)
        .filter(|name| !excluded.contains(name))
        .collect();
    checksum(record, Some(selected.as_slice()))
}

/// Deterministic textual form of a value.
///
/// Strings hash as their raw text; scalars as their JSON text; composites as JSON with
/// object keys sorted at every depth.
pub fn normalize_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => {
            let mut out = String::new();
            write_canonical(other, &mut out);
            out
        }
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(item) = map.get(key) {
                    write_canonical(item, out);
                }
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
