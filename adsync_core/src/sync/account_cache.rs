use crate::entity::models::AccountRecord;
use crate::entity::types::Collection;
use crate::store::models::ItemKey;
use crate::store::traits::{PartitionedStore, get_required};
use crate::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Read-through cache of account records keyed by `(scope_id, account_id)`.
///
/// Entries live until invalidated; `SyncEngine` invalidates an account whenever it writes one.
#[derive(Debug, Default)]
pub struct AccountCache {
    entries: RwLock<HashMap<ItemKey, AccountRecord>>,
}

impl AccountCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached record, or a store read on miss. Missing accounts are `Error::NotFound` and are
    /// not cached.
    #[tracing::instrument(level = "debug", skip(self, store))]
    pub async fn get_or_fetch(
        &self,
        store: &dyn PartitionedStore,
        scope_id: &str,
        account_id: &str,
    ) -> Result<AccountRecord> {
        let key = ItemKey::new(scope_id, account_id);
        if let Some(hit) = self.entries.read().await.get(&key) {
            return Ok(hit.clone());
        }

        let item = get_required(store, Collection::AdAccounts, &key).await?;
        let record = AccountRecord::from_item(&item);
        self.entries.write().await.insert(key, record.clone());
        Ok(record)
    }

    pub async fn invalidate(&self, scope_id: &str, account_id: &str) {
        self.entries
            .write()
            .await
            .remove(&ItemKey::new(scope_id, account_id));
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::models::ItemUpdate;
    use serde_json::json;

    async fn put_account(store: &MemoryStore, timezone: &str) {
        store
            .update(
                Collection::AdAccounts,
                &ItemKey::new("scope-1", "42"),
                &ItemUpdate::new()
                    .set("is_active", json!(true))
                    .set("timezone", json!(timezone)),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn serves_hits_until_invalidated() {
        let store = MemoryStore::new();
        let cache = AccountCache::new();
        put_account(&store, "UTC").await;

        let first = cache.get_or_fetch(&store, "scope-1", "42").await.unwrap();
        assert_eq!(first.timezone.as_deref(), Some("UTC"));

        put_account(&store, "Europe/Berlin").await;
        let cached = cache.get_or_fetch(&store, "scope-1", "42").await.unwrap();
        assert_eq!(cached.timezone.as_deref(), Some("UTC"));

        cache.invalidate("scope-1", "42").await;
        let fresh = cache.get_or_fetch(&store, "scope-1", "42").await.unwrap();
        assert_eq!(fresh.timezone.as_deref(), Some("Europe/Berlin"));
    }

    #[tokio::test]
    async fn missing_accounts_are_not_found_and_not_cached() {
        let store = MemoryStore::new();
        let cache = AccountCache::new();
        let err = cache.get_or_fetch(&store, "scope-1", "404").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(cache.len().await, 0);
    }
}
