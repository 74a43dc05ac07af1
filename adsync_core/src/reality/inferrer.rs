use crate::config::SyncConfig;
use crate::entity::models::{AccountRecord, PageRecord, ScopeRecord, StoredEntity};
use crate::entity::types::{Collection, EntityType, ParentRule};
use crate::o11y::METRICS_TARGET;
use crate::reality::models::{EntityClaim, RealityClaim};
use crate::store::models::{ItemPage, PageRequest};
use crate::store::traits::PartitionedStore;
use crate::{Error, Result};
use async_stream::try_stream;
use futures_util::Stream;
use std::sync::Arc;

/// Reconstructs what currently exists from stored state alone.
///
/// Every stream is lazy and finite: it holds at most one store page in memory, can be
/// dropped at any point, and starts over from the beginning when requested again.
#[derive(Clone)]
pub struct RealityInferrer {
    store: Arc<dyn PartitionedStore>,
    query_page_size: usize,
    metrics_batch_size: usize,
}

impl RealityInferrer {
    pub fn new(store: Arc<dyn PartitionedStore>, config: &SyncConfig) -> Self {
        Self {
            store,
            query_page_size: config.query_page_size.max(1),
            metrics_batch_size: config.metrics_batch_size.max(1),
        }
    }

    /// Scopes, then per scope its active accounts and its active, accessible pages.
    pub fn iter_reality_base(&self) -> impl Stream<Item = Result<RealityClaim>> + Send + 'static {
        let this = self.clone();
        try_stream! {
            let mut scopes = CollectionCounter::new(Collection::Scopes, this.metrics_batch_size);
            let mut accounts = CollectionCounter::new(Collection::AdAccounts, this.metrics_batch_size);
            let mut pages = CollectionCounter::new(Collection::Pages, this.metrics_batch_size);

            let mut scope_request = Some(PageRequest::first(this.query_page_size));
            while let Some(request) = scope_request.take() {
                let page = this.store.scan(Collection::Scopes, request).await?;
                scope_request = this.next_request(&page);

                for item in page.items {
                    scopes.record();
                    let scope = ScopeRecord::from_item(&item);
                    yield RealityClaim::Scope { scope_id: scope.scope_id.clone() };

                    let mut request = Some(PageRequest::first(this.query_page_size));
                    while let Some(current) = request.take() {
                        let page = this
                            .store
                            .query(Collection::AdAccounts, &scope.scope_id, current)
                            .await?;
                        request = this.next_request(&page);
                        for item in page.items {
                            accounts.record();
                            let account = AccountRecord::from_item(&item);
                            if account.is_active() {
                                yield RealityClaim::from(&account);
                            }
                        }
                    }

                    let mut request = Some(PageRequest::first(this.query_page_size));
                    while let Some(current) = request.take() {
                        let page = this
                            .store
                            .query(Collection::Pages, &scope.scope_id, current)
                            .await?;
                        request = this.next_request(&page);
                        for item in page.items {
                            pages.record();
                            let record = PageRecord::from_item(&item);
                            if record.is_active_and_accessible() {
                                yield RealityClaim::from(&record);
                            }
                        }
                    }
                }
            }

            scopes.finish();
            accounts.finish();
            pages.finish();
        }
    }

    /// Stored children of an account or page claim.
    ///
    /// `entity_types` narrows the child collections walked; `fields` narrows the projected
    /// attributes (canonical attributes when `None`). A scope claim yields a single
    /// `Error::Validation`.
    pub fn iter_entities_for_claim(
        &self,
        claim: &RealityClaim,
        entity_types: Option<&[EntityType]>,
        fields: Option<&[&str]>,
    ) -> impl Stream<Item = Result<EntityClaim>> + Send + 'static {
        let target = claim
            .child_partition()
            .map(|(parent, id)| (parent, id.to_string()))
            .ok_or_else(|| {
                Error::validation(format!(
                    "scope claim '{}' has no child entities",
                    claim.scope_id()
                ))
            });
        self.iter_children(target, entity_types, fields)
    }

    pub fn iter_entities_per_account_id(
        &self,
        account_id: &str,
        entity_types: Option<&[EntityType]>,
        fields: Option<&[&str]>,
    ) -> impl Stream<Item = Result<EntityClaim>> + Send + 'static {
        self.iter_children(
            Ok((ParentRule::AdAccount, account_id.to_string())),
            entity_types,
            fields,
        )
    }

    pub fn iter_entities_per_page_id(
        &self,
        page_id: &str,
        entity_types: Option<&[EntityType]>,
        fields: Option<&[&str]>,
    ) -> impl Stream<Item = Result<EntityClaim>> + Send + 'static {
        self.iter_children(
            Ok((ParentRule::Page, page_id.to_string())),
            entity_types,
            fields,
        )
    }

    fn iter_children(
        &self,
        target: Result<(ParentRule, String)>,
        entity_types: Option<&[EntityType]>,
        fields: Option<&[&str]>,
    ) -> impl Stream<Item = Result<EntityClaim>> + Send + 'static {
        let this = self.clone();
        let wanted: Option<Vec<EntityType>> =
            entity_types.map(|types| types.iter().map(|t| t.storage_type()).collect());
        let fields: Option<Vec<String>> =
            fields.map(|names| names.iter().map(|n| n.to_string()).collect());

        try_stream! {
            let (parent, parent_id) = target?;
            let child_types: Vec<EntityType> = EntityType::children_of(parent)
                .filter(|t| wanted.as_ref().map_or(true, |w| w.contains(t)))
                .collect();

            for entity_type in child_types {
                let collection = entity_type.collection();
                let mut counter = CollectionCounter::new(collection, this.metrics_batch_size);

                let mut request = Some(PageRequest::first(this.query_page_size));
                while let Some(current) = request.take() {
                    let page = this.store.query(collection, &parent_id, current).await?;
                    request = this.next_request(&page);
                    for item in page.items {
                        counter.record();
                        let entity = StoredEntity::from_item(entity_type, item);
                        if entity.is_inaccessible() {
                            continue;
                        }
                        yield EntityClaim::project(entity, fields.as_deref());
                    }
                }

                counter.finish();
            }
        }
    }

    fn next_request(&self, page: &ItemPage) -> Option<PageRequest> {
        page.last_key
            .clone()
            .map(|key| PageRequest::after(key, self.query_page_size))
    }
}

/// Records read from one collection, reported every `batch_size` records plus a final
/// remainder.
struct CollectionCounter {
    collection: Collection,
    batch_size: usize,
    pending: usize,
    total: u64,
}

impl CollectionCounter {
    fn new(collection: Collection, batch_size: usize) -> Self {
        Self {
            collection,
            batch_size,
            pending: 0,
            total: 0,
        }
    }

    fn record(&mut self) {
        self.pending += 1;
        self.total += 1;
        if self.pending >= self.batch_size {
            self.emit();
        }
    }

    fn finish(mut self) {
        if self.pending > 0 {
            self.emit();
        }
    }

    fn emit(&mut self) {
        tracing::info!(
            target: METRICS_TARGET,
            collection = %self.collection,
            count = self.pending,
            total = self.total,
            "reality records read"
        );
        self.pending = 0;
    }
}
