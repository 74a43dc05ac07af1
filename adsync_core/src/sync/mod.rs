//! Write side: turning fetched entity records into idempotent partial updates.

pub mod account_cache;
pub mod engine;
