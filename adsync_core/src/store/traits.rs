use crate::entity::types::Collection;
use crate::store::models::{Item, ItemKey, ItemPage, ItemUpdate, PageRequest};
use crate::{Error, Result};
use async_trait::async_trait;

/// Partitioned key-value store holding one logical collection per entity type.
///
/// Implementations must apply each `update` atomically per item, evaluating
/// set-if-absent against the stored value rather than a prior client read, so concurrent
/// producers never need client-side locking.
#[async_trait]
pub trait PartitionedStore: Send + Sync {
    async fn get(&self, collection: Collection, key: &ItemKey) -> Result<Option<Item>>;

    /// Items of one partition in sort-key order.
    async fn query(
        &self,
        collection: Collection,
        partition: &str,
        page: PageRequest,
    ) -> Result<ItemPage>;

    /// Create-or-partially-update a single item.
    async fn update(&self, collection: Collection, key: &ItemKey, update: &ItemUpdate)
    -> Result<()>;

    /// Apply many updates. Backends with a native bulk path should override this.
    async fn batch_update(
        &self,
        collection: Collection,
        writes: &[(ItemKey, ItemUpdate)],
    ) -> Result<()> {
        for (key, update) in writes {
            self.update(collection, key, update).await?;
        }
        Ok(())
    }

    /// Walk a whole collection. Intended for administrative flows; order is backend-defined
    /// but stable across pages.
    async fn scan(&self, collection: Collection, page: PageRequest) -> Result<ItemPage>;
}

/// `get`, turning a missing key into `Error::NotFound`.
#[tracing::instrument(level = "debug", skip(store))]
pub async fn get_required(
    store: &dyn PartitionedStore,
    collection: Collection,
    key: &ItemKey,
) -> Result<Item> {
    store
        .get(collection, key)
        .await?
        .ok_or_else(|| Error::NotFound(format!("{collection} item {key}")))
}
