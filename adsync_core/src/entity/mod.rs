//! Remote entity model: the closed type enumeration, transient records, and the typed
//! views of what the store persists.

pub mod models;
pub mod record;
pub mod types;
