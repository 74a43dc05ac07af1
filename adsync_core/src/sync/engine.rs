use crate::checksum::checksum_excluding;
use crate::config::SyncConfig;
use crate::entity::models::{
    ATTR_ENTITY_ID, ATTR_IS_ACCESSIBLE, ATTR_IS_ACTIVE, EntityBase, ScopeRecord, StoredEntity,
};
use crate::entity::record::EntityRecord;
use crate::entity::types::{Collection, EntityType, ParentRule};
use crate::lifecycle::infer_lifecycle;
use crate::store::batch::{BatchConfig, with_batch};
use crate::store::models::{ItemKey, ItemUpdate};
use crate::store::traits::{PartitionedStore, get_required};
use crate::sync::account_cache::AccountCache;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

/// A fully resolved write for one record: where it goes and what it merges.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityWrite {
    /// Storage type (after remapping).
    pub entity_type: EntityType,
    pub collection: Collection,
    pub key: ItemKey,
    pub update: ItemUpdate,
}

/// Resolve key, lifecycle candidates and checksums for `record` without touching a store.
pub fn build_entity_write(
    entity_type: EntityType,
    record: &EntityRecord,
    now: DateTime<Utc>,
) -> Result<EntityWrite> {
    let descriptor = entity_type.descriptor();

    let linkage = descriptor.parent.linkage_fields();
    let parent_id = record
        .first_string(linkage)
        .map(|id| strip_parent_prefix(descriptor.parent, id))
        .ok_or_else(|| {
            Error::validation(format!(
                "{entity_type} record has none of the linkage fields {linkage:?}"
            ))
        })?;
    let entity_id = record
        .first_string(descriptor.id_fields)
        .map(|id| strip_prefix(id, descriptor.id_prefix))
        .ok_or_else(|| {
            Error::validation(format!(
                "{entity_type} record has none of the id fields {:?}",
                descriptor.id_fields
            ))
        })?;

    let lifecycle = infer_lifecycle(record, descriptor, now);
    let has_volatile = descriptor
        .volatile_fields
        .iter()
        .any(|field| record.get(field).is_some());
    let checksum = if has_volatile {
        checksum_excluding(record.fields(), descriptor.volatile_fields)
    } else {
        record.checksum().clone()
    };

    let base = EntityBase {
        bol: lifecycle.bol,
        eol: lifecycle.eol,
        hash: Some(checksum.data_hash),
        hash_fields: Some(checksum.fields_hash),
        is_active: record.get_bool(ATTR_IS_ACTIVE),
        is_accessible: record.get_bool(ATTR_IS_ACCESSIBLE),
    };
    let mut update = ItemUpdate::new()
        .set(ATTR_ENTITY_ID, Value::String(entity_id.clone()))
        .set(descriptor.parent.attribute(), Value::String(parent_id.clone()));
    update = base.write_into(update);
    for (field, attribute) in descriptor.extra_attributes {
        if let Some(value) = record.get_present(field) {
            update = update.set(*attribute, value.clone());
        }
    }

    Ok(EntityWrite {
        entity_type: descriptor.entity_type,
        collection: descriptor.collection,
        key: ItemKey::new(parent_id, entity_id),
        update,
    })
}

fn strip_prefix(id: String, prefix: Option<&str>) -> String {
    let stripped = prefix
        .and_then(|p| id.strip_prefix(p))
        .filter(|rest| !rest.is_empty())
        .map(str::to_string);
    stripped.unwrap_or(id)
}

/// Account ids are stored without their `act_` prefix, so links to them are too.
fn strip_parent_prefix(parent: ParentRule, id: String) -> String {
    match parent {
        ParentRule::AdAccount => strip_prefix(id, EntityType::AdAccount.descriptor().id_prefix),
        ParentRule::Scope | ParentRule::Page => id,
    }
}

/// Entity upsert coordinator.
///
/// Every write is a single partial update; set-if-absent lifecycle merges are evaluated by
/// the store, so concurrent engines over the same store need no coordination.
pub struct SyncEngine {
    store: Arc<dyn PartitionedStore>,
    config: SyncConfig,
    accounts: Option<Arc<AccountCache>>,
}

impl SyncEngine {
    #[tracing::instrument(level = "debug", skip(store))]
    pub fn new(store: Arc<dyn PartitionedStore>, config: SyncConfig) -> Self {
        Self {
            store,
            config,
            accounts: None,
        }
    }

    /// Invalidate entries of `cache` whenever an account is written.
    pub fn with_account_cache(mut self, cache: Arc<AccountCache>) -> Self {
        self.accounts = Some(cache);
        self
    }

    pub fn store(&self) -> &Arc<dyn PartitionedStore> {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Upsert a record handed over with a string type tag, as collectors do.
    #[tracing::instrument(level = "debug", skip(self, record))]
    pub async fn upsert_entity(&self, entity_type: &str, record: Value) -> Result<()> {
        let entity_type: EntityType = entity_type.parse()?;
        let record = EntityRecord::try_from(record)?;
        self.upsert(entity_type, &record).await
    }

    #[tracing::instrument(level = "debug", skip(self, record))]
    pub async fn upsert(&self, entity_type: EntityType, record: &EntityRecord) -> Result<()> {
        let write = build_entity_write(entity_type, record, Utc::now())?;
        self.store
            .update(write.collection, &write.key, &write.update)
            .await?;
        tracing::debug!(
            entity_type = %write.entity_type,
            key = %write.key,
            "entity upserted"
        );
        if write.entity_type == EntityType::AdAccount {
            if let Some(cache) = &self.accounts {
                cache.invalidate(&write.key.partition, &write.key.sort).await;
            }
        }
        Ok(())
    }

    /// Upsert many records of one type through a deduplicating batch session.
    ///
    /// Returns the number of writes issued. Records already written within the dedup window
    /// are skipped. A record that fails validation aborts the call after the writes staged
    /// before it were flushed.
    #[tracing::instrument(level = "debug", skip(self, records), fields(records = records.len()))]
    pub async fn upsert_entities(
        &self,
        entity_type: EntityType,
        records: &[EntityRecord],
    ) -> Result<u64> {
        let now = Utc::now();
        let outcome = with_batch(
            self.store.as_ref(),
            entity_type.collection(),
            BatchConfig::from(&self.config),
            |batch| {
                for record in records {
                    let write = build_entity_write(entity_type, record, now)?;
                    batch.upsert_deduped(write.key, write.update);
                }
                Ok(batch.stats())
            },
        )
        .await;

        if entity_type.storage_type() == EntityType::AdAccount {
            if let Some(cache) = &self.accounts {
                cache.clear().await;
            }
        }
        Ok(outcome?.forwarded)
    }

    /// Stored state of one entity. Missing keys are `Error::NotFound`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_entity(
        &self,
        entity_type: EntityType,
        parent_id: &str,
        entity_id: &str,
    ) -> Result<StoredEntity> {
        let key = ItemKey::new(parent_id, entity_id);
        let item = get_required(self.store.as_ref(), entity_type.collection(), &key).await?;
        Ok(StoredEntity::from_item(entity_type, item))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn upsert_scope(&self, scope: &ScopeRecord) -> Result<()> {
        if scope.scope_id.trim().is_empty() {
            return Err(Error::validation("scope_id is empty"));
        }
        self.store
            .update(Collection::Scopes, &scope.key(), &scope.to_update())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::models::{ATTR_BOL, ATTR_EOL, ATTR_HASH};
    use crate::store::memory::MemoryStore;
    use crate::store::sqlite::SqliteStore;
    use serde_json::json;

    fn engine() -> (MemoryStore, SyncEngine) {
        let store = MemoryStore::new();
        let engine = SyncEngine::new(Arc::new(store.clone()), SyncConfig::default());
        (store, engine)
    }

    fn record(value: Value) -> EntityRecord {
        EntityRecord::try_from(value).unwrap()
    }

    fn archived_campaign() -> Value {
        json!({
            "id": "123",
            "account_id": "456",
            "created_time": "2018-02-14T16:33:19-0800",
            "effective_status": "ARCHIVED",
            "updated_time": "2018-02-17T16:33:19-0800",
        })
    }

    #[tokio::test]
    async fn archived_campaign_gets_utc_lifecycle_bounds() {
        let (_, engine) = engine();
        engine
            .upsert_entity("campaign", archived_campaign())
            .await
            .unwrap();

        let stored = engine
            .get_entity(EntityType::Campaign, "456", "123")
            .await
            .unwrap();
        assert_eq!(stored.attributes[ATTR_BOL], json!("2018-02-15T00:33:19Z"));
        assert_eq!(stored.attributes[ATTR_EOL], json!("2018-02-18T00:33:19Z"));
        assert_eq!(stored.attributes[ATTR_ENTITY_ID], json!("123"));
        assert_eq!(stored.attributes["account_id"], json!("456"));
        assert!(stored.base.hash.is_some());
    }

    #[tokio::test]
    async fn first_observed_bol_and_eol_win() {
        let (_, engine) = engine();
        engine
            .upsert_entity("campaign", archived_campaign())
            .await
            .unwrap();
        engine
            .upsert_entity(
                "campaign",
                json!({
                    "id": "123",
                    "account_id": "456",
                    "created_time": "2019-01-01T00:00:00Z",
                    "configured_status": "DELETED",
                    "updated_time": "2020-01-01T00:00:00Z",
                }),
            )
            .await
            .unwrap();

        let stored = engine
            .get_entity(EntityType::Campaign, "456", "123")
            .await
            .unwrap();
        assert_eq!(stored.attributes[ATTR_BOL], json!("2018-02-15T00:33:19Z"));
        assert_eq!(stored.attributes[ATTR_EOL], json!("2018-02-18T00:33:19Z"));
    }

    #[tokio::test]
    async fn replaying_a_record_converges_on_the_same_state() {
        let (store, engine) = engine();
        engine
            .upsert_entity("campaign", archived_campaign())
            .await
            .unwrap();
        let once = store.all_items(Collection::Campaigns).await;
        engine
            .upsert_entity("campaign", archived_campaign())
            .await
            .unwrap();
        assert_eq!(store.all_items(Collection::Campaigns).await, once);
    }

    #[tokio::test]
    async fn absent_fields_are_never_nulled() {
        let (_, engine) = engine();
        engine
            .upsert_entity(
                "ad",
                json!({"id": "9", "account_id": "456", "is_accessible": true}),
            )
            .await
            .unwrap();
        engine
            .upsert_entity("ad", json!({"id": "9", "account_id": "456", "is_accessible": null}))
            .await
            .unwrap();

        let stored = engine.get_entity(EntityType::Ad, "456", "9").await.unwrap();
        assert_eq!(stored.base.is_accessible, Some(true));
        assert!(!stored.attributes.contains_key(ATTR_BOL));
        assert!(!stored.attributes.contains_key(ATTR_EOL));
    }

    #[tokio::test]
    async fn rejects_unknown_types_and_malformed_records() {
        let (store, engine) = engine();

        let err = engine
            .upsert_entity("insight", json!({"id": "1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = engine
            .upsert_entity("campaign", json!("not a mapping"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = engine
            .upsert_entity("campaign", json!({"id": "1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(msg) if msg.contains("account_id")));

        assert_eq!(store.applied_writes(), 0);
    }

    #[tokio::test]
    async fn promotable_posts_land_in_the_post_collection() {
        let (store, engine) = engine();
        engine
            .upsert_entity(
                "page_post_promotable",
                json!({"id": "p1", "page_id": "pg1", "created_time": "2020-05-01T10:00:00Z"}),
            )
            .await
            .unwrap();
        let posts = store.all_items(Collection::PagePosts).await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].key, ItemKey::new("pg1", "p1"));
        let stored = engine
            .get_entity(EntityType::PagePostPromotable, "pg1", "p1")
            .await
            .unwrap();
        assert_eq!(stored.entity_type, EntityType::PagePost);
    }

    #[tokio::test]
    async fn remote_type_names_are_accepted() {
        let (store, engine) = engine();
        engine
            .upsert_entity("AdSet", json!({"id": "7", "account_id": "456"}))
            .await
            .unwrap();
        engine
            .upsert_entity("Account", json!({"id": "act_456", "scope_id": "s"}))
            .await
            .unwrap();
        assert_eq!(store.all_items(Collection::AdSets).await.len(), 1);
        assert_eq!(store.all_items(Collection::AdAccounts).await.len(), 1);
    }

    #[test]
    fn accounts_strip_prefix_and_copy_timezone() {
        let now = Utc::now();
        let write = build_entity_write(
            EntityType::AdAccount,
            &record(json!({
                "id": "act_777",
                "scope": "scope-1",
                "timezone_name": "America/Los_Angeles",
                "is_active": true,
            })),
            now,
        )
        .unwrap();
        assert_eq!(write.collection, Collection::AdAccounts);
        assert_eq!(write.key, ItemKey::new("scope-1", "777"));

        let mut attrs = serde_json::Map::new();
        write.update.apply_to(&mut attrs);
        assert_eq!(attrs["timezone"], json!("America/Los_Angeles"));
        assert_eq!(attrs["scope_id"], json!("scope-1"));
        assert_eq!(attrs["is_active"], json!(true));

        let child = build_entity_write(
            EntityType::Campaign,
            &record(json!({"id": "1", "ad_account_id": "act_777"})),
            now,
        )
        .unwrap();
        assert_eq!(child.key, ItemKey::new("777", "1"));
    }

    #[test]
    fn volatile_fields_do_not_change_the_hash() {
        let now = Utc::now();
        let hash_of = |balance: i64| {
            let write = build_entity_write(
                EntityType::AdAccount,
                &record(json!({"account_id": "1", "scope_id": "s", "balance": balance})),
                now,
            )
            .unwrap();
            match write.update.action(ATTR_HASH) {
                Some(crate::store::models::UpdateAction::Set(v)) => v.clone(),
                other => panic!("unexpected hash action {other:?}"),
            }
        };
        assert_eq!(hash_of(10), hash_of(20));
    }

    #[test]
    fn pages_default_their_bol_to_now() {
        let now = Utc::now();
        let write = build_entity_write(
            EntityType::Page,
            &record(json!({"id": "pg1", "scope_id": "s"})),
            now,
        )
        .unwrap();
        assert!(write.update.action(ATTR_BOL).is_some());
    }

    #[tokio::test]
    async fn bulk_upserts_skip_keys_inside_the_window() {
        let (store, engine) = engine();
        let records: Vec<EntityRecord> = ["1", "2", "1", "3", "2"]
            .into_iter()
            .map(|id| record(json!({"id": id, "account_id": "456"})))
            .collect();
        let written = engine
            .upsert_entities(EntityType::AdSet, &records)
            .await
            .unwrap();
        assert_eq!(written, 3);
        assert_eq!(store.applied_writes(), 3);
    }

    #[tokio::test]
    async fn bulk_upserts_flush_staged_writes_before_failing() {
        let (store, engine) = engine();
        let records = vec![
            record(json!({"id": "1", "account_id": "456"})),
            record(json!({"id": "2"})),
            record(json!({"id": "3", "account_id": "456"})),
        ];
        let err = engine
            .upsert_entities(EntityType::Ad, &records)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.all_items(Collection::Ads).await.len(), 1);
    }

    #[tokio::test]
    async fn account_writes_invalidate_the_cache() {
        let (store, engine) = engine();
        let cache = Arc::new(AccountCache::new());
        let engine = engine.with_account_cache(cache.clone());

        engine
            .upsert_entity(
                "ad_account",
                json!({"account_id": "1", "scope_id": "s", "timezone_name": "UTC"}),
            )
            .await
            .unwrap();
        let cached = cache.get_or_fetch(&store, "s", "1").await.unwrap();
        assert_eq!(cached.timezone.as_deref(), Some("UTC"));

        engine
            .upsert_entity(
                "ad_account",
                json!({"account_id": "1", "scope_id": "s", "timezone_name": "Asia/Tokyo"}),
            )
            .await
            .unwrap();
        let fresh = cache.get_or_fetch(&store, "s", "1").await.unwrap();
        assert_eq!(fresh.timezone.as_deref(), Some("Asia/Tokyo"));
    }

    #[tokio::test]
    async fn missing_entities_and_empty_scopes() {
        let (_, engine) = engine();
        let err = engine
            .get_entity(EntityType::Comment, "pg1", "c1")
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = engine
            .upsert_scope(&ScopeRecord::new(" "))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        engine.upsert_scope(&ScopeRecord::new("s")).await.unwrap();
    }

    #[tokio::test]
    async fn sqlite_backend_keeps_first_lifecycle_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("adsync.db"), 1)
            .await
            .unwrap();
        let engine = SyncEngine::new(Arc::new(store), SyncConfig::default());

        engine
            .upsert_entity("campaign", archived_campaign())
            .await
            .unwrap();
        engine
            .upsert_entity(
                "campaign",
                json!({
                    "id": "123",
                    "account_id": "456",
                    "created_time": "2019-01-01T00:00:00Z",
                    "status": "DELETED",
                    "updated_time": "2020-01-01T00:00:00Z",
                    "name": "renamed",
                }),
            )
            .await
            .unwrap();

        let stored = engine
            .get_entity(EntityType::Campaign, "456", "123")
            .await
            .unwrap();
        assert_eq!(stored.attributes[ATTR_BOL], json!("2018-02-15T00:33:19Z"));
        assert_eq!(stored.attributes[ATTR_EOL], json!("2018-02-18T00:33:19Z"));
        assert_eq!(stored.base.hash_fields.as_deref().map(str::len), Some(16));
    }
}
