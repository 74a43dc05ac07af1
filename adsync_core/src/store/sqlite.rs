//! SQLite-backed PartitionedStore implementation.
//!
//! One table per collection, keyed `(pk, sk)`, attributes in a JSON text column using the
//! abbreviated names from `store::codec`. Partial updates are a single
//! `INSERT ... ON CONFLICT DO UPDATE` whose merge is written with `json_set` (set) and
//! `json_insert` (set-if-absent), so SQLite evaluates it against the stored row.
//!
//! Usage:
//! ```ignore
//! let store = SqliteStore::open("/path/to/adsync.db", 5).await?;
//! ```

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

use crate::config::SyncConfig;
use crate::entity::types::Collection;
use crate::error::{Error, Result};
use crate::store::codec::{decode_attributes, encode_name};
use crate::store::models::{Item, ItemKey, ItemPage, ItemUpdate, PageRequest, UpdateAction};
use crate::store::traits::PartitionedStore;

/// A durable, file-backed store in a single SQLite file (WAL mode).
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create (or open) the store at `path`, creating parent directories and tables.
    pub async fn open(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::backend("sqlite_store", e))?;
            }
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path.display()))
            .map_err(|e| Error::backend("sqlite_store", e))?
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(opts)
            .await
            .map_err(|e| Error::backend("sqlite_store", e))?;

        for collection in Collection::ALL {
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    pk TEXT NOT NULL,
                    sk TEXT NOT NULL,
                    attrs TEXT NOT NULL DEFAULT '{{}}',
                    PRIMARY KEY (pk, sk)
                )",
                collection.table_name()
            );
            sqlx::query(&ddl)
                .execute(&pool)
                .await
                .map_err(|e| Error::backend("sqlite_store_migration", e))?;
        }

        tracing::info!(path = %path.display(), "sqlite store opened");
        Ok(Self { pool })
    }

    pub async fn from_config(config: &SyncConfig) -> Result<Self> {
        Self::open(&config.store_path, config.sqlite_max_connections).await
    }
}

// ── Helpers ─────────────────────────────────────────────────────

fn db_err(e: sqlx::Error) -> Error {
    Error::backend("sqlite_store", e)
}

/// Encoded attribute as a JSON path. Quotes and backslashes cannot be expressed in a
/// quoted path label, so such names are rejected.
fn json_path(canonical: &str) -> Result<String> {
    let wire = encode_name(canonical);
    if wire.contains('"') || wire.contains('\\') {
        return Err(Error::Validation(format!(
            "attribute name '{canonical}' cannot be stored"
        )));
    }
    Ok(format!("$.\"{wire}\""))
}

struct BoundAction {
    path: String,
    value: String,
    set_if_absent: bool,
}

fn bind_actions(update: &ItemUpdate) -> Result<Vec<BoundAction>> {
    update
        .actions()
        .iter()
        .filter_map(|(name, action)| {
            let (value, set_if_absent) = match action {
                UpdateAction::Set(v) => (v, false),
                UpdateAction::SetIfAbsent(v) => (v, true),
            };
            (!value.is_null()).then_some((name, value, set_if_absent))
        })
        .map(|(name, value, set_if_absent)| {
            Ok(BoundAction {
                path: json_path(name)?,
                value: serde_json::to_string(value)
                    .map_err(|e| Error::backend("serialize attribute value", e))?,
                set_if_absent,
            })
        })
        .collect()
}

/// Nest one `json_set` / `json_insert` call per action around `base`.
fn merge_expr(base: &str, actions: &[BoundAction]) -> String {
    actions.iter().fold(base.to_string(), |expr, action| {
        let func = if action.set_if_absent {
            "json_insert"
        } else {
            "json_set"
        };
        format!("{func}({expr}, ?, json(?))")
    })
}

fn upsert_sql(collection: Collection, actions: &[BoundAction]) -> String {
    let table = collection.table_name();
    if actions.is_empty() {
        return format!(
            "INSERT INTO {table} (pk, sk, attrs) VALUES (?, ?, '{{}}') ON CONFLICT(pk, sk) DO NOTHING"
        );
    }
    format!(
        "INSERT INTO {table} (pk, sk, attrs) VALUES (?, ?, {insert})
         ON CONFLICT(pk, sk) DO UPDATE SET attrs = {update}",
        insert = merge_expr("'{}'", actions),
        update = merge_expr("attrs", actions),
    )
}

async fn execute_update<'e, E>(
    executor: E,
    collection: Collection,
    key: &ItemKey,
    update: &ItemUpdate,
) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let actions = bind_actions(update)?;
    let sql = upsert_sql(collection, &actions);
    let mut query = sqlx::query(&sql).bind(&key.partition).bind(&key.sort);
    // The merge expression appears twice: once for the insert, once for the conflict update.
    for action in actions.iter().chain(actions.iter()) {
        query = query.bind(&action.path).bind(&action.value);
    }
    query.execute(executor).await.map_err(db_err)?;
    Ok(())
}

fn row_to_item(row: &SqliteRow) -> Result<Item> {
    let partition: String = row.try_get("pk").map_err(db_err)?;
    let sort: String = row.try_get("sk").map_err(db_err)?;
    let raw: String = row.try_get("attrs").map_err(db_err)?;
    let attributes: Map<String, Value> =
        serde_json::from_str(&raw).map_err(|e| Error::backend("decode stored attributes", e))?;
    Ok(Item {
        key: ItemKey::new(partition, sort),
        attributes: decode_attributes(attributes),
    })
}

fn rows_to_page(rows: Vec<SqliteRow>, limit: usize) -> Result<ItemPage> {
    let items = rows.iter().map(row_to_item).collect::<Result<Vec<_>>>()?;
    Ok(ItemPage::from_items(items, limit))
}

// ── PartitionedStore impl ──────────────────────────────────────

#[async_trait]
impl PartitionedStore for SqliteStore {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn get(&self, collection: Collection, key: &ItemKey) -> Result<Option<Item>> {
        let sql = format!(
            "SELECT pk, sk, attrs FROM {} WHERE pk = ?1 AND sk = ?2",
            collection.table_name()
        );
        let row = sqlx::query(&sql)
            .bind(&key.partition)
            .bind(&key.sort)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_item).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn query(
        &self,
        collection: Collection,
        partition: &str,
        page: PageRequest,
    ) -> Result<ItemPage> {
        let table = collection.table_name();
        let limit = page.limit as i64;
        let rows = match &page.start_after {
            Some(after) if after.partition == partition => {
                let sql = format!(
                    "SELECT pk, sk, attrs FROM {table}
                     WHERE pk = ?1 AND sk > ?2 ORDER BY sk LIMIT ?3"
                );
                sqlx::query(&sql)
                    .bind(partition)
                    .bind(&after.sort)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
            _ => {
                let sql = format!(
                    "SELECT pk, sk, attrs FROM {table} WHERE pk = ?1 ORDER BY sk LIMIT ?2"
                );
                sqlx::query(&sql)
                    .bind(partition)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(db_err)?;
        rows_to_page(rows, page.limit)
    }

    #[tracing::instrument(level = "debug", skip(self, update))]
    async fn update(
        &self,
        collection: Collection,
        key: &ItemKey,
        update: &ItemUpdate,
    ) -> Result<()> {
        execute_update(&self.pool, collection, key, update).await
    }

    #[tracing::instrument(level = "debug", skip(self, writes), fields(writes = writes.len()))]
    async fn batch_update(
        &self,
        collection: Collection,
        writes: &[(ItemKey, ItemUpdate)],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for (key, update) in writes {
            execute_update(&mut *tx, collection, key, update).await?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn scan(&self, collection: Collection, page: PageRequest) -> Result<ItemPage> {
        let table = collection.table_name();
        let limit = page.limit as i64;
        let rows = match &page.start_after {
            Some(after) => {
                let sql = format!(
                    "SELECT pk, sk, attrs FROM {table}
                     WHERE pk > ?1 OR (pk = ?1 AND sk > ?2)
                     ORDER BY pk, sk LIMIT ?3"
                );
                sqlx::query(&sql)
                    .bind(&after.partition)
                    .bind(&after.sort)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!("SELECT pk, sk, attrs FROM {table} ORDER BY pk, sk LIMIT ?1");
                sqlx::query(&sql)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(db_err)?;
        rows_to_page(rows, page.limit)
    }
}
