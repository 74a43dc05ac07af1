//! Partitioned store abstraction, its backends, and bulk-write sessions.
//!
//! - `traits::PartitionedStore` is the only surface the sync engine and reality inferrer use
//! - `memory::MemoryStore` serves tests and single-process runs
//! - `sqlite::SqliteStore` persists to a single SQLite file, one table per collection
//! - `batch` provides deduplicating, always-flushed write sessions

pub mod batch;
pub mod codec;
pub mod memory;
pub mod models;
pub mod sqlite;
pub mod traits;
