//! Bulk write sessions with a bounded deduplication window.
//!
//! A session is acquired through [`with_batch`]: the body buffers writes through a
//! [`BatchWriter`], and every buffered write is flushed once the body returns, whether it
//! succeeded or failed. The writer is borrowed mutably by exactly one body, so a session can
//! never be shared between producers.

use std::collections::{HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};

use crate::Result;
use crate::config::{DEFAULT_BATCH_MAX_ITEMS, DEFAULT_DEDUP_WINDOW, SyncConfig};
use crate::entity::types::Collection;
use crate::o11y::METRICS_TARGET;
use crate::store::models::{ItemKey, ItemUpdate};
use crate::store::traits::PartitionedStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Keys remembered by `upsert_deduped`. 0 disables deduplication.
    pub dedup_window: usize,
    /// Writes per `batch_update` call when flushing.
    pub max_batch_items: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            dedup_window: DEFAULT_DEDUP_WINDOW,
            max_batch_items: DEFAULT_BATCH_MAX_ITEMS,
        }
    }
}

impl From<&SyncConfig> for BatchConfig {
    fn from(cfg: &SyncConfig) -> Self {
        Self {
            dedup_window: cfg.dedup_window,
            max_batch_items: cfg.batch_max_items,
        }
    }
}

/// Upper bound on the slots reserved up front; larger windows grow on demand.
const WINDOW_PREALLOC_LIMIT: usize = 1024;

/// FIFO window of recently admitted keys.
///
/// The oldest key is evicted as soon as an admission fills the window, so with capacity N
/// the window holds the N - 1 most recent keys between calls. Capacity 1 keeps the single
/// most recent key, and capacity 0 disables deduplication.
#[derive(Debug, Clone)]
pub struct DedupWindow {
    capacity: usize,
    order: VecDeque<ItemKey>,
    members: HashSet<ItemKey>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        let reserved = capacity.min(WINDOW_PREALLOC_LIMIT);
        Self {
            capacity,
            order: VecDeque::with_capacity(reserved),
            members: HashSet::with_capacity(reserved),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.capacity == 0
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, key: &ItemKey) -> bool {
        self.members.contains(key)
    }

    /// Returns `false` when `key` is already in the window. Otherwise admits it, evicting
    /// the oldest key once the window is full, and returns `true`.
    pub fn admit(&mut self, key: &ItemKey) -> bool {
        if self.is_disabled() {
            return true;
        }
        if self.members.contains(key) {
            return false;
        }
        self.order.push_back(key.clone());
        self.members.insert(key.clone());
        if self.order.len() >= self.capacity && self.order.len() > 1 {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Writes buffered for the store.
    pub forwarded: u64,
    /// `upsert_deduped` calls dropped by the window.
    pub deduplicated: u64,
    /// Writes the store accepted during flush.
    pub flushed: u64,
}

/// Buffer of writes against one collection. Obtained only through [`with_batch`].
#[derive(Debug)]
pub struct BatchWriter {
    collection: Collection,
    window: DedupWindow,
    pending: Vec<(ItemKey, ItemUpdate)>,
    max_batch_items: usize,
    stats: BatchStats,
}

impl BatchWriter {
    fn new(collection: Collection, config: BatchConfig) -> Self {
        Self {
            collection,
            window: DedupWindow::new(config.dedup_window),
            pending: Vec::new(),
            max_batch_items: config.max_batch_items.max(1),
            stats: BatchStats::default(),
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Buffer a write unconditionally.
    pub fn upsert(&mut self, key: ItemKey, update: ItemUpdate) {
        self.pending.push((key, update));
        self.stats.forwarded += 1;
    }

    /// Buffer a write unless the same key was admitted recently. Returns whether the write
    /// was forwarded.
    pub fn upsert_deduped(&mut self, key: ItemKey, update: ItemUpdate) -> bool {
        if !self.window.admit(&key) {
            self.stats.deduplicated += 1;
            return false;
        }
        self.upsert(key, update);
        true
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    /// Push every buffered write. All chunks are attempted; the first failure is returned.
    async fn flush(&mut self, store: &dyn PartitionedStore) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        let mut first_err = None;
        for chunk in pending.chunks(self.max_batch_items) {
            match store.batch_update(self.collection, chunk).await {
                Ok(()) => self.stats.flushed += chunk.len() as u64,
                Err(e) => {
                    tracing::error!(
                        collection = %self.collection,
                        writes = chunk.len(),
                        error = %e,
                        "batch flush chunk failed"
                    );
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Run `body` against a fresh batch session over `collection`, then flush.
///
/// The flush runs on every exit path of `body`, including a panic, which is resumed once
/// the buffered writes are pushed. A flush failure is returned after the whole flush was
/// attempted; when `body` itself failed, its error wins and the flush failure is logged.
#[tracing::instrument(level = "debug", skip(store, body))]
pub async fn with_batch<T, F>(
    store: &dyn PartitionedStore,
    collection: Collection,
    config: BatchConfig,
    body: F,
) -> Result<T>
where
    F: FnOnce(&mut BatchWriter) -> Result<T>,
{
    let mut writer = BatchWriter::new(collection, config);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&mut writer)));
    let flushed = writer.flush(store).await;

    let stats = writer.stats();
    tracing::debug!(
        target: METRICS_TARGET,
        collection = %collection,
        forwarded = stats.forwarded,
        deduplicated = stats.deduplicated,
        flushed = stats.flushed,
        "batch session closed"
    );

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(payload) => {
            if let Err(flush_err) = &flushed {
                tracing::error!(
                    collection = %collection,
                    error = %flush_err,
                    "flush after panicking batch body failed"
                );
            }
            panic::resume_unwind(payload)
        }
    };

    match (outcome, flushed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(flush_err)) => Err(flush_err),
        (Err(body_err), Ok(())) => Err(body_err),
        (Err(body_err), Err(flush_err)) => {
            tracing::error!(
                collection = %collection,
                error = %flush_err,
                "flush after failed batch body also failed"
            );
            Err(body_err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::store::memory::MemoryStore;
    use crate::store::models::{Item, ItemPage, PageRequest};
    use async_trait::async_trait;
    use serde_json::json;

    fn key(id: &str) -> ItemKey {
        ItemKey::new("acct", id)
    }

    fn write(id: &str) -> ItemUpdate {
        ItemUpdate::new().set("entity_id", json!(id))
    }

    fn config(window: usize) -> BatchConfig {
        BatchConfig {
            dedup_window: window,
            max_batch_items: 2,
        }
    }

    #[tokio::test]
    async fn repeated_key_within_window_is_written_once() {
        let store = MemoryStore::new();
        let n = 4;
        let forwarded = with_batch(&store, Collection::Ads, config(n), |batch| {
            for _ in 0..=n {
                batch.upsert_deduped(key("1"), write("1"));
            }
            Ok(batch.stats())
        })
        .await
        .unwrap();
        assert_eq!(forwarded.forwarded, 1);
        assert_eq!(forwarded.deduplicated, n as u64);
        assert_eq!(store.applied_writes(), 1);
    }

    #[tokio::test]
    async fn first_key_is_written_again_after_n_distinct_keys() {
        let store = MemoryStore::new();
        let n = 3;
        with_batch(&store, Collection::Ads, config(n), |batch| {
            for i in 0..n {
                let id = format!("k{i}");
                assert!(batch.upsert_deduped(key(&id), write(&id)));
            }
            assert!(batch.upsert_deduped(key("k0"), write("k0")));
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(store.applied_writes(), (n + 1) as u64);
    }

    #[tokio::test]
    async fn key_still_in_window_is_not_rewritten() {
        let store = MemoryStore::new();
        with_batch(&store, Collection::Ads, config(3), |batch| {
            batch.upsert_deduped(key("a"), write("a"));
            batch.upsert_deduped(key("b"), write("b"));
            assert!(!batch.upsert_deduped(key("a"), write("a")));
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(store.applied_writes(), 2);
    }

    #[tokio::test]
    async fn single_slot_window_collapses_back_to_back_repeats() {
        let store = MemoryStore::new();
        with_batch(&store, Collection::Ads, config(1), |batch| {
            assert!(batch.upsert_deduped(key("a"), write("a")));
            assert!(!batch.upsert_deduped(key("a"), write("a")));
            assert!(batch.upsert_deduped(key("b"), write("b")));
            assert!(batch.upsert_deduped(key("a"), write("a")));
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(store.applied_writes(), 3);
    }

    #[tokio::test]
    async fn zero_capacity_disables_dedup() {
        let store = MemoryStore::new();
        with_batch(&store, Collection::Ads, config(0), |batch| {
            for _ in 0..3 {
                assert!(batch.upsert_deduped(key("1"), write("1")));
            }
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(store.applied_writes(), 3);
    }

    #[tokio::test]
    async fn plain_upsert_bypasses_the_window() {
        let store = MemoryStore::new();
        with_batch(&store, Collection::Ads, config(10), |batch| {
            batch.upsert(key("1"), write("1"));
            batch.upsert(key("1"), write("1"));
            assert!(batch.upsert_deduped(key("1"), write("1")));
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(store.applied_writes(), 3);
    }

    #[tokio::test]
    async fn buffered_writes_are_flushed_when_the_body_fails() {
        let store = MemoryStore::new();
        let err = with_batch(&store, Collection::Ads, config(10), |batch| {
            batch.upsert_deduped(key("1"), write("1"));
            batch.upsert_deduped(key("2"), write("2"));
            batch.upsert_deduped(key("3"), write("3"));
            Err::<(), _>(Error::Validation("bad record".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.all_items(Collection::Ads).await.len(), 3);
    }

    /// Store whose bulk path always fails.
    struct FailingStore;

    #[async_trait]
    impl PartitionedStore for FailingStore {
        async fn get(&self, _: Collection, _: &ItemKey) -> Result<Option<Item>> {
            Ok(None)
        }
        async fn query(&self, _: Collection, _: &str, _: PageRequest) -> Result<ItemPage> {
            Ok(ItemPage::default())
        }
        async fn update(&self, _: Collection, _: &ItemKey, _: &ItemUpdate) -> Result<()> {
            Err(Error::BackendMessage("throttled".into()))
        }
        async fn scan(&self, _: Collection, _: PageRequest) -> Result<ItemPage> {
            Ok(ItemPage::default())
        }
    }

    #[tokio::test]
    async fn flush_failure_propagates_after_a_successful_body() {
        let err = with_batch(&FailingStore, Collection::Ads, config(10), |batch| {
            batch.upsert(key("1"), write("1"));
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::BackendMessage(msg) if msg == "throttled"));
    }

    #[tokio::test]
    async fn buffered_writes_are_flushed_when_the_body_panics() {
        use futures_util::FutureExt;

        let store = MemoryStore::new();
        let outcome = AssertUnwindSafe(with_batch(
            &store,
            Collection::Ads,
            config(10),
            |batch| -> Result<()> {
                batch.upsert_deduped(key("1"), write("1"));
                batch.upsert_deduped(key("2"), write("2"));
                panic!("malformed row");
            },
        ))
        .catch_unwind()
        .await;
        assert!(outcome.is_err());
        assert_eq!(store.all_items(Collection::Ads).await.len(), 2);
    }

    #[test]
    fn window_evicts_in_fifo_order() {
        let mut window = DedupWindow::new(3);
        assert!(window.admit(&key("a")));
        assert!(window.admit(&key("b")));
        assert!(window.admit(&key("c")));
        assert!(!window.contains(&key("a")));
        assert!(window.contains(&key("b")));
        assert!(window.contains(&key("c")));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn huge_capacity_does_not_reserve_up_front() {
        let mut window = DedupWindow::new(usize::MAX);
        assert!(window.admit(&key("a")));
        assert!(!window.admit(&key("a")));
        assert!(window.order.capacity() < 1 << 20);
    }
}
