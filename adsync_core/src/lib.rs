//! adsync core library: incremental mirroring of a remote ad entity graph into a
//! partitioned store, and read-side inference of what currently exists.

pub mod checksum;
pub mod config;
pub mod entity;
pub mod error;
pub mod lifecycle;
pub mod o11y;
pub mod reality;
pub mod store;
pub mod sync;

pub use checksum::{Checksum, checksum, checksum_excluding};
pub use config::SyncConfig;
pub use entity::models::{AccountRecord, EntityBase, PageRecord, ScopeRecord, StoredEntity};
pub use entity::record::EntityRecord;
pub use entity::types::{Collection, EntityDescriptor, EntityType, ParentRule};
pub use error::{Error, Result};
pub use lifecycle::{Lifecycle, infer_lifecycle};
pub use reality::inferrer::RealityInferrer;
pub use reality::models::{EntityClaim, RealityClaim};
pub use store::batch::{BatchConfig, BatchStats, BatchWriter, with_batch};
pub use store::memory::MemoryStore;
pub use store::models::{Item, ItemKey, ItemPage, ItemUpdate, PageRequest, UpdateAction};
pub use store::sqlite::SqliteStore;
pub use store::traits::PartitionedStore;
pub use sync::account_cache::AccountCache;
pub use sync::engine::{EntityWrite, SyncEngine, build_entity_write};
