use crate::entity::models::{AccountRecord, CANONICAL_ATTRIBUTES, PageRecord, StoredEntity};
use crate::entity::types::{EntityType, ParentRule};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Something the store says exists, at the scope / account / page level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RealityClaim {
    Scope {
        scope_id: String,
    },
    AdAccount {
        scope_id: String,
        account_id: String,
        timezone: Option<String>,
    },
    Page {
        scope_id: String,
        page_id: String,
    },
}

impl RealityClaim {
    pub fn scope_id(&self) -> &str {
        match self {
            RealityClaim::Scope { scope_id }
            | RealityClaim::AdAccount { scope_id, .. }
            | RealityClaim::Page { scope_id, .. } => scope_id,
        }
    }

    /// Parent kind and id that child entities of this claim are stored under.
    /// Scopes have no directly stored children.
    pub fn child_partition(&self) -> Option<(ParentRule, &str)> {
        match self {
            RealityClaim::Scope { .. } => None,
            RealityClaim::AdAccount { account_id, .. } => {
                Some((ParentRule::AdAccount, account_id.as_str()))
            }
            RealityClaim::Page { page_id, .. } => Some((ParentRule::Page, page_id.as_str())),
        }
    }
}

impl From<&AccountRecord> for RealityClaim {
    fn from(account: &AccountRecord) -> Self {
        RealityClaim::AdAccount {
            scope_id: account.scope_id.clone(),
            account_id: account.account_id.clone(),
            timezone: account.timezone.clone(),
        }
    }
}

impl From<&PageRecord> for RealityClaim {
    fn from(page: &PageRecord) -> Self {
        RealityClaim::Page {
            scope_id: page.scope_id.clone(),
            page_id: page.page_id.clone(),
        }
    }
}

/// A stored child entity under an account or page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityClaim {
    pub entity_type: EntityType,
    pub parent_id: String,
    pub entity_id: String,
    /// Projected attributes; nulls never appear.
    pub fields: Map<String, Value>,
}

impl EntityClaim {
    /// Project `entity` onto `fields`, or onto the canonical attributes when `None`.
    pub fn project(entity: StoredEntity, fields: Option<&[String]>) -> Self {
        let names: Vec<&str> = match fields {
            Some(names) => names.iter().map(String::as_str).collect(),
            None => CANONICAL_ATTRIBUTES.to_vec(),
        };
        let mut attributes = entity.attributes;
        let projected = names
            .into_iter()
            .filter_map(|name| {
                let value = attributes.remove(name).filter(|v| !v.is_null())?;
                Some((name.to_string(), value))
            })
            .collect();

        Self {
            entity_type: entity.entity_type,
            parent_id: entity.parent_id,
            entity_id: entity.entity_id,
            fields: projected,
        }
    }
}
