use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Compound primary key: partition (hash) key plus sort (range) key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    pub partition: String,
    pub sort: String,
}

impl ItemKey {
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }

    /// Key of a record that is alone in its partition (scopes).
    pub fn partition_only(partition: impl Into<String>) -> Self {
        Self::new(partition, "")
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.partition, self.sort)
    }
}

/// A stored row: its key plus canonical attribute names -> values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub key: ItemKey,
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum UpdateAction {
    /// Overwrite unconditionally.
    Set(Value),
    /// Write only when the attribute is missing or null in the store.
    SetIfAbsent(Value),
}

/// Partial update against one item. Attributes not mentioned are left untouched.
///
/// Null values are never written: setting an attribute to null is a no-op, so a stored
/// null cannot arise and "missing" means the same thing on every backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemUpdate {
    actions: Vec<(String, UpdateAction)>,
}

impl ItemUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: Value) -> Self {
        if !value.is_null() {
            self.actions.push((name.into(), UpdateAction::Set(value)));
        }
        self
    }

    pub fn set_if_absent(mut self, name: impl Into<String>, value: Value) -> Self {
        if !value.is_null() {
            self.actions
                .push((name.into(), UpdateAction::SetIfAbsent(value)));
        }
        self
    }

    pub fn actions(&self) -> &[(String, UpdateAction)] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn action(&self, name: &str) -> Option<&UpdateAction> {
        self.actions
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, a)| a)
    }

    /// Apply the update to an attribute map in place, in action order.
    pub fn apply_to(&self, attributes: &mut Map<String, Value>) {
        for (name, action) in &self.actions {
            match action {
                UpdateAction::Set(value) | UpdateAction::SetIfAbsent(value) if value.is_null() => {}
                UpdateAction::Set(value) => {
                    attributes.insert(name.clone(), value.clone());
                }
                UpdateAction::SetIfAbsent(value) => {
                    let present = attributes.get(name).is_some_and(|v| !v.is_null());
                    if !present {
                        attributes.insert(name.clone(), value.clone());
                    }
                }
            }
        }
    }
}

/// Paging cursor for `query` / `scan`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Resume strictly after this key.
    pub start_after: Option<ItemKey>,
    pub limit: usize,
}

impl PageRequest {
    pub fn first(limit: usize) -> Self {
        Self {
            start_after: None,
            limit,
        }
    }

    pub fn after(key: ItemKey, limit: usize) -> Self {
        Self {
            start_after: Some(key),
            limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ItemPage {
    pub items: Vec<Item>,
    /// Set when more items may follow; pass back via `PageRequest::after`.
    pub last_key: Option<ItemKey>,
}

impl ItemPage {
    /// Build a page, setting `last_key` only when the page came back full.
    pub fn from_items(items: Vec<Item>, limit: usize) -> Self {
        let last_key = if limit > 0 && items.len() >= limit {
            items.last().map(|item| item.key.clone())
        } else {
            None
        };
        Self { items, last_key }
    }
}
