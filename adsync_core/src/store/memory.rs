use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::Result;
use crate::entity::types::Collection;
use crate::store::models::{Item, ItemKey, ItemPage, ItemUpdate, PageRequest};
use crate::store::traits::PartitionedStore;

type Rows = BTreeMap<ItemKey, Map<String, Value>>;

/// In-memory partitioned store for local development and unit tests.
///
/// Semantics:
/// - every update holds the collection write lock, so set-if-absent is atomic per item
/// - data lives for the process lifetime only
#[derive(Clone, Default)]
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<Collection, Rows>>>,
    writes: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of item writes applied so far (primarily for tests).
    pub fn applied_writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Snapshot of a whole collection (primarily for tests).
    pub async fn all_items(&self, collection: Collection) -> Vec<Item> {
        let collections = self.collections.read().await;
        collections
            .get(&collection)
            .map(|rows| rows.iter().map(|(k, v)| to_item(k, v)).collect())
            .unwrap_or_default()
    }

    fn apply(rows: &mut Rows, key: &ItemKey, update: &ItemUpdate) {
        let attributes = rows.entry(key.clone()).or_default();
        update.apply_to(attributes);
    }
}

fn to_item(key: &ItemKey, attributes: &Map<String, Value>) -> Item {
    Item {
        key: key.clone(),
        attributes: attributes.clone(),
    }
}

fn lower_bound(page: &PageRequest, floor: ItemKey) -> Bound<ItemKey> {
    match &page.start_after {
        Some(after) if *after >= floor => Bound::Excluded(after.clone()),
        _ => Bound::Included(floor),
    }
}

#[async_trait]
impl PartitionedStore for MemoryStore {
    async fn get(&self, collection: Collection, key: &ItemKey) -> Result<Option<Item>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .and_then(|rows| rows.get(key))
            .map(|attrs| to_item(key, attrs)))
    }

    async fn query(
        &self,
        collection: Collection,
        partition: &str,
        page: PageRequest,
    ) -> Result<ItemPage> {
        let collections = self.collections.read().await;
        let Some(rows) = collections.get(&collection) else {
            return Ok(ItemPage::default());
        };
        let start = lower_bound(&page, ItemKey::partition_only(partition));
        let items: Vec<Item> = rows
            .range((start, Bound::Unbounded))
            .take_while(|(k, _)| k.partition == partition)
            .take(page.limit)
            .map(|(k, v)| to_item(k, v))
            .collect();
        Ok(ItemPage::from_items(items, page.limit))
    }

    async fn update(
        &self,
        collection: Collection,
        key: &ItemKey,
        update: &ItemUpdate,
    ) -> Result<()> {
        let mut collections = self.collections.write().await;
        Self::apply(collections.entry(collection).or_default(), key, update);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn batch_update(
        &self,
        collection: Collection,
        writes: &[(ItemKey, ItemUpdate)],
    ) -> Result<()> {
        let mut collections = self.collections.write().await;
        let rows = collections.entry(collection).or_default();
        for (key, update) in writes {
            Self::apply(rows, key, update);
        }
        self.writes.fetch_add(writes.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    async fn scan(&self, collection: Collection, page: PageRequest) -> Result<ItemPage> {
        let collections = self.collections.read().await;
        let Some(rows) = collections.get(&collection) else {
            return Ok(ItemPage::default());
        };
        let start = match page.start_after.clone() {
            Some(after) => Bound::Excluded(after),
            None => Bound::Unbounded,
        };
        let items: Vec<Item> = rows
            .range((start, Bound::Unbounded))
            .take(page.limit)
            .map(|(k, v)| to_item(k, v))
            .collect();
        Ok(ItemPage::from_items(items, page.limit))
    }
}
