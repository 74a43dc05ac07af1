//! Closed enumeration of the remote entity types and their static storage descriptors.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical entity type tag carried by every record handed to the sync engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    AdAccount,
    Campaign,
    AdSet,
    Ad,
    AdCreative,
    AdVideo,
    AdImage,
    CustomAudience,
    Page,
    PagePost,
    PagePostPromotable,
    PageVideo,
    Comment,
}

impl EntityType {
    pub const ALL: [EntityType; 13] = [
        EntityType::AdAccount,
        EntityType::Campaign,
        EntityType::AdSet,
        EntityType::Ad,
        EntityType::AdCreative,
        EntityType::AdVideo,
        EntityType::AdImage,
        EntityType::CustomAudience,
        EntityType::Page,
        EntityType::PagePost,
        EntityType::PagePostPromotable,
        EntityType::PageVideo,
        EntityType::Comment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::AdAccount => "ad_account",
            EntityType::Campaign => "campaign",
            EntityType::AdSet => "ad_set",
            EntityType::Ad => "ad",
            EntityType::AdCreative => "ad_creative",
            EntityType::AdVideo => "ad_video",
            EntityType::AdImage => "ad_image",
            EntityType::CustomAudience => "custom_audience",
            EntityType::Page => "page",
            EntityType::PagePost => "page_post",
            EntityType::PagePostPromotable => "page_post_promotable",
            EntityType::PageVideo => "page_video",
            EntityType::Comment => "comment",
        }
    }

    /// Type the entity is persisted as. Variants sharing a collection collapse here.
    pub fn storage_type(self) -> EntityType {
        match self {
            EntityType::PagePostPromotable => EntityType::PagePost,
            other => other,
        }
    }

    pub fn descriptor(self) -> &'static EntityDescriptor {
        match self.storage_type() {
            EntityType::AdAccount => &AD_ACCOUNT,
            EntityType::Campaign => &CAMPAIGN,
            EntityType::AdSet => &AD_SET,
            EntityType::Ad => &AD,
            EntityType::AdCreative => &AD_CREATIVE,
            EntityType::AdVideo => &AD_VIDEO,
            EntityType::AdImage => &AD_IMAGE,
            EntityType::CustomAudience => &CUSTOM_AUDIENCE,
            EntityType::Page => &PAGE,
            EntityType::PageVideo => &PAGE_VIDEO,
            EntityType::Comment => &COMMENT,
            EntityType::PagePost | EntityType::PagePostPromotable => &PAGE_POST,
        }
    }

    pub fn collection(self) -> Collection {
        self.descriptor().collection
    }

    pub fn parent_rule(self) -> ParentRule {
        self.descriptor().parent
    }

    /// Storage types whose records hang off the given parent kind.
    pub fn children_of(parent: ParentRule) -> impl Iterator<Item = EntityType> {
        EntityType::ALL
            .into_iter()
            .filter(move |t| t.storage_type() == *t && t.parent_rule() == parent)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    /// Accepts snake_case tags and the remote's CamelCase names alike (`ad_set`, `AdSet`).
    /// `Account` is an alias for `AdAccount`.
    fn from_str(s: &str) -> Result<Self> {
        let folded: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        if folded == "account" {
            return Ok(EntityType::AdAccount);
        }
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str().chars().filter(|c| *c != '_').eq(folded.chars()))
            .ok_or_else(|| Error::Validation(format!("unrecognized entity type '{s}'")))
    }
}

/// Which record identifies the partition an entity lives under.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentRule {
    Scope,
    AdAccount,
    Page,
}

impl ParentRule {
    /// Record fields consulted, in order, to find the parent id.
    pub fn linkage_fields(self) -> &'static [&'static str] {
        match self {
            ParentRule::Scope => &["scope_id", "scope"],
            ParentRule::AdAccount => &["account_id", "ad_account_id"],
            ParentRule::Page => &["page_id"],
        }
    }

    /// Canonical attribute the parent id is stored under.
    pub fn attribute(self) -> &'static str {
        match self {
            ParentRule::Scope => "scope_id",
            ParentRule::AdAccount => "account_id",
            ParentRule::Page => "page_id",
        }
    }
}

/// One logical collection per storage type, plus the scope collection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Scopes,
    AdAccounts,
    Campaigns,
    AdSets,
    Ads,
    AdCreatives,
    AdVideos,
    AdImages,
    CustomAudiences,
    Pages,
    PagePosts,
    PageVideos,
    Comments,
}

impl Collection {
    pub const ALL: [Collection; 13] = [
        Collection::Scopes,
        Collection::AdAccounts,
        Collection::Campaigns,
        Collection::AdSets,
        Collection::Ads,
        Collection::AdCreatives,
        Collection::AdVideos,
        Collection::AdImages,
        Collection::CustomAudiences,
        Collection::Pages,
        Collection::PagePosts,
        Collection::PageVideos,
        Collection::Comments,
    ];

    /// Stable name, also used as the SQL table name.
    pub fn table_name(self) -> &'static str {
        match self {
            Collection::Scopes => "scopes",
            Collection::AdAccounts => "ad_accounts",
            Collection::Campaigns => "campaigns",
            Collection::AdSets => "ad_sets",
            Collection::Ads => "ads",
            Collection::AdCreatives => "ad_creatives",
            Collection::AdVideos => "ad_videos",
            Collection::AdImages => "ad_images",
            Collection::CustomAudiences => "custom_audiences",
            Collection::Pages => "pages",
            Collection::PagePosts => "page_posts",
            Collection::PageVideos => "page_videos",
            Collection::Comments => "comments",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Static description of how a storage type is keyed, checksummed and merged.
#[derive(Debug)]
pub struct EntityDescriptor {
    pub entity_type: EntityType,
    pub collection: Collection,
    pub parent: ParentRule,
    /// Record fields holding the entity id, first present wins.
    pub id_fields: &'static [&'static str],
    /// Prefix stripped from ids (`act_123` -> `123`).
    pub id_prefix: Option<&'static str>,
    pub created_time_field: &'static str,
    pub updated_time_field: &'static str,
    /// Substitute the processing time when the remote never reports a creation time.
    pub default_bol_if_absent: bool,
    /// Fields that churn without the entity changing; kept out of the data checksum.
    pub volatile_fields: &'static [&'static str],
    /// `(record field, stored attribute)` pairs copied verbatim on every upsert.
    pub extra_attributes: &'static [(&'static str, &'static str)],
}

impl EntityDescriptor {
    const fn child(
        entity_type: EntityType,
        collection: Collection,
        parent: ParentRule,
    ) -> EntityDescriptor {
        EntityDescriptor {
            entity_type,
            collection,
            parent,
            id_fields: &["id"],
            id_prefix: None,
            created_time_field: "created_time",
            updated_time_field: "updated_time",
            default_bol_if_absent: false,
            volatile_fields: &[],
            extra_attributes: &[],
        }
    }
}

static AD_ACCOUNT: EntityDescriptor = EntityDescriptor {
    entity_type: EntityType::AdAccount,
    collection: Collection::AdAccounts,
    parent: ParentRule::Scope,
    id_fields: &["account_id", "id"],
    id_prefix: Some("act_"),
    created_time_field: "created_time",
    updated_time_field: "updated_time",
    default_bol_if_absent: false,
    volatile_fields: &["amount_spent", "balance", "spend_cap"],
    extra_attributes: &[("timezone_name", "timezone"), ("name", "name")],
};

static CAMPAIGN: EntityDescriptor =
    EntityDescriptor::child(EntityType::Campaign, Collection::Campaigns, ParentRule::AdAccount);
static AD_SET: EntityDescriptor =
    EntityDescriptor::child(EntityType::AdSet, Collection::AdSets, ParentRule::AdAccount);
static AD: EntityDescriptor =
    EntityDescriptor::child(EntityType::Ad, Collection::Ads, ParentRule::AdAccount);
static AD_CREATIVE: EntityDescriptor = EntityDescriptor::child(
    EntityType::AdCreative,
    Collection::AdCreatives,
    ParentRule::AdAccount,
);
static AD_VIDEO: EntityDescriptor =
    EntityDescriptor::child(EntityType::AdVideo, Collection::AdVideos, ParentRule::AdAccount);
static AD_IMAGE: EntityDescriptor =
    EntityDescriptor::child(EntityType::AdImage, Collection::AdImages, ParentRule::AdAccount);

static CUSTOM_AUDIENCE: EntityDescriptor = EntityDescriptor {
    created_time_field: "time_created",
    updated_time_field: "time_updated",
    volatile_fields: &["approximate_count"],
    ..EntityDescriptor::child(
        EntityType::CustomAudience,
        Collection::CustomAudiences,
        ParentRule::AdAccount,
    )
};

static PAGE: EntityDescriptor = EntityDescriptor {
    default_bol_if_absent: true,
    volatile_fields: &["fan_count"],
    ..EntityDescriptor::child(EntityType::Page, Collection::Pages, ParentRule::Scope)
};

static PAGE_POST: EntityDescriptor =
    EntityDescriptor::child(EntityType::PagePost, Collection::PagePosts, ParentRule::Page);
static PAGE_VIDEO: EntityDescriptor =
    EntityDescriptor::child(EntityType::PageVideo, Collection::PageVideos, ParentRule::Page);
static COMMENT: EntityDescriptor =
    EntityDescriptor::child(EntityType::Comment, Collection::Comments, ParentRule::Page);
