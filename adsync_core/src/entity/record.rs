use crate::checksum::{Checksum, checksum};
use crate::{Error, Result};
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// One remote entity as fetched by a collector: field name -> value.
///
/// The all-fields checksum is memoized on first use; every mutation resets it.
#[derive(Debug, Clone, Default)]
pub struct EntityRecord {
    fields: Map<String, Value>,
    checksum: OnceLock<Checksum>,
}

impl EntityRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            checksum: OnceLock::new(),
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Field value, treating an explicit JSON null as absent.
    pub fn get_present(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).filter(|v| !v.is_null())
    }

    /// First present field among `names`, rendered as a non-empty string.
    pub fn first_string(&self, names: &[&str]) -> Option<String> {
        names.iter().find_map(|name| match self.get_present(name)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get_present(name).and_then(Value::as_bool)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
        self.checksum = OnceLock::new();
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let removed = self.fields.remove(name);
        if removed.is_some() {
            self.checksum = OnceLock::new();
        }
        removed
    }

    /// Checksum over every field on the record, computed once per record state.
    pub fn checksum(&self) -> &Checksum {
        self.checksum.get_or_init(|| checksum(&self.fields, None))
    }
}

impl PartialEq for EntityRecord {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl From<Map<String, Value>> for EntityRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self::new(fields)
    }
}

impl TryFrom<Value> for EntityRecord {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self::new(fields)),
            other => Err(Error::Validation(format!(
                "entity record must be a field mapping, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
