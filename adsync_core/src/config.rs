use crate::{Error, Result};
use std::path::PathBuf;

pub const DEFAULT_DEDUP_WINDOW: usize = 500;
pub const DEFAULT_BATCH_MAX_ITEMS: usize = 25;
pub const DEFAULT_QUERY_PAGE_SIZE: usize = 1000;
pub const DEFAULT_METRICS_BATCH_SIZE: usize = 1000;

/// Runtime configuration for the sync engine and its store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// SQLite file backing `SqliteStore`.
    pub store_path: PathBuf,
    pub sqlite_max_connections: u32,
    /// Recent-key window of deduplicated batch writes. 0 disables deduplication.
    pub dedup_window: usize,
    /// Writes per store round-trip when a batch session flushes.
    pub batch_max_items: usize,
    /// Items fetched per store page while inferring reality.
    pub query_page_size: usize,
    /// Records between two per-collection counter events.
    pub metrics_batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("./data/adsync.db"),
            sqlite_max_connections: 5,
            dedup_window: DEFAULT_DEDUP_WINDOW,
            batch_max_items: DEFAULT_BATCH_MAX_ITEMS,
            query_page_size: DEFAULT_QUERY_PAGE_SIZE,
            metrics_batch_size: DEFAULT_METRICS_BATCH_SIZE,
        }
    }
}

impl SyncConfig {
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; unset variables fall back to defaults,
    /// malformed ones are rejected.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let cfg = Self {
            store_path: lookup("ADSYNC_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_path),
            sqlite_max_connections: parse_var(
                &lookup,
                "ADSYNC_SQLITE_MAX_CONNECTIONS",
                defaults.sqlite_max_connections,
            )?,
            dedup_window: parse_var(&lookup, "ADSYNC_DEDUP_WINDOW", defaults.dedup_window)?,
            batch_max_items: parse_var(
                &lookup,
                "ADSYNC_BATCH_MAX_ITEMS",
                defaults.batch_max_items,
            )?,
            query_page_size: parse_var(
                &lookup,
                "ADSYNC_QUERY_PAGE_SIZE",
                defaults.query_page_size,
            )?,
            metrics_batch_size: parse_var(
                &lookup,
                "ADSYNC_METRICS_BATCH_SIZE",
                defaults.metrics_batch_size,
            )?,
        };

        cfg.validate()?;
        Ok(cfg)
    }

    #[tracing::instrument(level = "debug")]
    pub fn validate(&self) -> Result<()> {
        if self.store_path.as_os_str().is_empty() {
            return Err(Error::Validation("store_path is empty".to_string()));
        }
        if self.sqlite_max_connections == 0 {
            return Err(Error::Validation(
                "sqlite_max_connections must be > 0".to_string(),
            ));
        }
        if self.batch_max_items == 0 {
            return Err(Error::Validation("batch_max_items must be > 0".to_string()));
        }
        if self.query_page_size == 0 {
            return Err(Error::Validation("query_page_size must be > 0".to_string()));
        }
        if self.metrics_batch_size == 0 {
            return Err(Error::Validation(
                "metrics_batch_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| Error::Validation(format!("{name} must be a number, got '{raw}'"))),
        None => Ok(default),
    }
}
