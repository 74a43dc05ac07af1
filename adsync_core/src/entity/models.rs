use crate::entity::types::{EntityType, ParentRule};
use crate::lifecycle::{format_timestamp, parse_timestamp};
use crate::store::models::{Item, ItemKey, ItemUpdate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const ATTR_ENTITY_ID: &str = "entity_id";
pub const ATTR_BOL: &str = "bol";
pub const ATTR_EOL: &str = "eol";
pub const ATTR_HASH: &str = "hash";
pub const ATTR_HASH_FIELDS: &str = "hash_fields";
pub const ATTR_IS_ACTIVE: &str = "is_active";
pub const ATTR_IS_ACCESSIBLE: &str = "is_accessible";
pub const ATTR_TIMEZONE: &str = "timezone";

/// Canonical attributes every stored child entity can report.
pub const CANONICAL_ATTRIBUTES: [&str; 7] = [
    ATTR_ENTITY_ID,
    ATTR_BOL,
    ATTR_EOL,
    ATTR_HASH,
    ATTR_HASH_FIELDS,
    ATTR_IS_ACTIVE,
    ATTR_IS_ACCESSIBLE,
];

/// Attributes shared by every persisted entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityBase {
    pub bol: Option<DateTime<Utc>>,
    pub eol: Option<DateTime<Utc>>,
    pub hash: Option<String>,
    pub hash_fields: Option<String>,
    pub is_active: Option<bool>,
    pub is_accessible: Option<bool>,
}

impl EntityBase {
    pub fn from_attributes(attributes: &Map<String, Value>) -> Self {
        Self {
            bol: attributes.get(ATTR_BOL).and_then(parse_timestamp_attr),
            eol: attributes.get(ATTR_EOL).and_then(parse_timestamp_attr),
            hash: string_attr(attributes, ATTR_HASH),
            hash_fields: string_attr(attributes, ATTR_HASH_FIELDS),
            is_active: attributes.get(ATTR_IS_ACTIVE).and_then(Value::as_bool),
            is_accessible: attributes.get(ATTR_IS_ACCESSIBLE).and_then(Value::as_bool),
        }
    }

    /// Unconditional sets for hashes and flags, set-if-absent for lifecycle bounds.
    /// `None` fields are left out of the update.
    pub fn write_into(&self, mut update: ItemUpdate) -> ItemUpdate {
        if let Some(bol) = self.bol {
            update = update.set_if_absent(ATTR_BOL, Value::String(format_timestamp(bol)));
        }
        if let Some(eol) = self.eol {
            update = update.set_if_absent(ATTR_EOL, Value::String(format_timestamp(eol)));
        }
        if let Some(hash) = &self.hash {
            update = update.set(ATTR_HASH, Value::String(hash.clone()));
        }
        if let Some(hash_fields) = &self.hash_fields {
            update = update.set(ATTR_HASH_FIELDS, Value::String(hash_fields.clone()));
        }
        if let Some(active) = self.is_active {
            update = update.set(ATTR_IS_ACTIVE, Value::Bool(active));
        }
        if let Some(accessible) = self.is_accessible {
            update = update.set(ATTR_IS_ACCESSIBLE, Value::Bool(accessible));
        }
        update
    }
}

fn parse_timestamp_attr(value: &Value) -> Option<DateTime<Utc>> {
    if value.is_null() {
        return None;
    }
    parse_timestamp(value)
}

fn string_attr(attributes: &Map<String, Value>, name: &str) -> Option<String> {
    attributes
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// A persisted account- or page-scoped entity (or an account/page read generically).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntity {
    pub entity_type: EntityType,
    pub parent_id: String,
    pub entity_id: String,
    pub base: EntityBase,
    /// Everything stored for the row, canonical names.
    pub attributes: Map<String, Value>,
}

impl StoredEntity {
    pub fn from_item(entity_type: EntityType, item: Item) -> Self {
        Self {
            entity_type: entity_type.storage_type(),
            parent_id: item.key.partition,
            entity_id: item.key.sort,
            base: EntityBase::from_attributes(&item.attributes),
            attributes: item.attributes,
        }
    }

    pub fn key(&self) -> ItemKey {
        ItemKey::new(&self.parent_id, &self.entity_id)
    }

    /// Whether the row is hidden from reality: only an explicit `false` counts.
    pub fn is_inaccessible(&self) -> bool {
        self.base.is_accessible == Some(false)
    }
}

/// Top-level grouping under which accounts and pages are enumerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRecord {
    pub scope_id: String,
    pub is_active: Option<bool>,
}

impl ScopeRecord {
    pub fn new(scope_id: impl Into<String>) -> Self {
        Self {
            scope_id: scope_id.into(),
            is_active: Some(true),
        }
    }

    pub fn key(&self) -> ItemKey {
        ItemKey::partition_only(&self.scope_id)
    }

    pub fn from_item(item: &Item) -> Self {
        Self {
            scope_id: item.key.partition.clone(),
            is_active: item.attributes.get(ATTR_IS_ACTIVE).and_then(Value::as_bool),
        }
    }

    pub fn to_update(&self) -> ItemUpdate {
        let mut update = ItemUpdate::new().set(
            ParentRule::Scope.attribute(),
            Value::String(self.scope_id.clone()),
        );
        if let Some(active) = self.is_active {
            update = update.set(ATTR_IS_ACTIVE, Value::Bool(active));
        }
        update
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub scope_id: String,
    pub account_id: String,
    pub base: EntityBase,
    pub timezone: Option<String>,
}

impl AccountRecord {
    pub fn from_item(item: &Item) -> Self {
        Self {
            scope_id: item.key.partition.clone(),
            account_id: item.key.sort.clone(),
            base: EntityBase::from_attributes(&item.attributes),
            timezone: string_attr(&item.attributes, ATTR_TIMEZONE),
        }
    }

    pub fn key(&self) -> ItemKey {
        ItemKey::new(&self.scope_id, &self.account_id)
    }

    pub fn is_active(&self) -> bool {
        self.base.is_active == Some(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub scope_id: String,
    pub page_id: String,
    pub base: EntityBase,
}

impl PageRecord {
    pub fn from_item(item: &Item) -> Self {
        Self {
            scope_id: item.key.partition.clone(),
            page_id: item.key.sort.clone(),
            base: EntityBase::from_attributes(&item.attributes),
        }
    }

    pub fn key(&self) -> ItemKey {
        ItemKey::new(&self.scope_id, &self.page_id)
    }

    pub fn is_active_and_accessible(&self) -> bool {
        self.base.is_active == Some(true) && self.base.is_accessible == Some(true)
    }
}
