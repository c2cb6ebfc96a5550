//! SQLite persistence
//!
//! [`StorageWriter::commit`] applies a normalized batch to its table as a keyed
//! upsert inside one transaction:
//!
//! - batch rows override stored rows with the same key
//! - stored rows missing from the batch are left alone
//! - an empty batch writes nothing
//! - any failure rolls the whole batch back; the timeout bounds staging the
//!   upserts, never the COMMIT itself
//!
//! Writers to the same table are serialized by a per-table async lock;
//! SQLite's busy timeout covers writers in other processes.

pub mod runs;
pub mod tables;

pub use runs::RunRecord;
pub use tables::TableRecord;

use crate::config::DatabaseConfig;
use crate::error::StorageError;
use crate::merge::{KeyedSet, MergeStats};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::{Executor, Sqlite};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

const MAX_IDENTIFIER_LEN: usize = 63;

/// SQL identifier rule for table names: a letter or `_`, then letters, digits or `_`
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {},
        _ => return false,
    }
    name.len() <= MAX_IDENTIFIER_LEN && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A validated table name, safe to interpolate into SQL
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName(String);

impl TableName {
    pub fn new(name: impl Into<String>) -> Result<Self, StorageError> {
        let name = name.into();
        if is_valid_identifier(&name) {
            Ok(Self(name))
        } else {
            Err(StorageError::InvalidTableName(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct StorageWriter {
    pool: SqlitePool,
    commit_timeout: Duration,
    table_locks: Mutex<HashMap<TableName, Arc<Mutex<()>>>>,
}

impl StorageWriter {
    /// Open (creating if needed) the database at `config.url`
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StorageError> {
        let in_memory = config.url.contains(":memory:") || config.url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .busy_timeout(config.busy_timeout);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // every connection to an in-memory url is a separate database, so keep exactly one alive
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(config.max_connections)
        };
        let pool = pool_options.connect_with(options).await?;

        info!(url = %config.url, "connected to database");
        Ok(Self::from_pool(pool, config.commit_timeout))
    }

    pub fn from_pool(pool: SqlitePool, commit_timeout: Duration) -> Self {
        Self {
            pool,
            commit_timeout,
            table_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the table and its indexes if they do not exist
    pub async fn ensure_table<T: TableRecord>(
        &self,
        table: &TableName,
    ) -> Result<(), StorageError> {
        self.pool.execute(tables::create_table_sql::<T>(table).as_str()).await?;
        for index in tables::index_sql::<T>(table) {
            self.pool.execute(index.as_str()).await?;
        }
        debug!(table = %table, "table ready");
        Ok(())
    }

    pub async fn count(&self, table: &TableName) -> Result<u64, StorageError> {
        Ok(count_rows(&self.pool, table).await?)
    }

    /// Every stored record of the table, ordered by key
    pub async fn load_all<T: TableRecord>(
        &self,
        table: &TableName,
    ) -> Result<KeyedSet<T>, StorageError> {
        let rows = sqlx::query(&tables::select_sql::<T>(table))
            .fetch_all(&self.pool)
            .await?;
        let records = rows.iter().map(T::from_row).collect::<Result<KeyedSet<T>, _>>()?;
        Ok(records)
    }

    /// Upsert `batch` into `table` atomically and report per-key outcomes
    pub async fn commit<T: TableRecord>(
        &self,
        table: &TableName,
        batch: &KeyedSet<T>,
    ) -> Result<MergeStats, StorageError> {
        let lock = self.table_lock(table).await;
        let _guard = lock.lock().await;

        if batch.is_empty() {
            let persisted = self.count(table).await?;
            info!(table = %table, retained = persisted, "empty batch, table left unchanged");
            return Ok(MergeStats::unchanged(persisted));
        }

        let mut tx = self.pool.begin().await?;
        let staged = tokio::time::timeout(
            self.commit_timeout,
            upsert_all(&mut tx, table, batch, Utc::now()),
        )
        .await;
        let stats = match staged {
            Ok(result) => result?,
            // dropping the transaction rolls it back
            Err(_) => return Err(StorageError::Timeout(self.commit_timeout)),
        };
        tx.commit().await?;

        info!(
            table = %table,
            rows = batch.len(),
            inserted = stats.inserted,
            overridden = stats.overridden,
            retained = stats.retained,
            "batch committed"
        );
        Ok(stats)
    }

    async fn table_lock(&self, table: &TableName) -> Arc<Mutex<()>> {
        let mut locks = self.table_locks.lock().await;
        locks.entry(table.clone()).or_default().clone()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Stage every upsert of the batch on `conn`; the caller owns the commit
async fn upsert_all<T: TableRecord>(
    conn: &mut SqliteConnection,
    table: &TableName,
    batch: &KeyedSet<T>,
    seen_at: DateTime<Utc>,
) -> Result<MergeStats, StorageError> {
    let sql = tables::upsert_sql::<T>(table);
    let before = count_rows(&mut *conn, table).await?;

    for record in batch.iter() {
        tables::bind_upsert(record, sqlx::query(&sql), seen_at)
            .execute(&mut *conn)
            .await?;
    }

    let after = count_rows(&mut *conn, table).await?;
    Ok(MergeStats::from_counts(before, after, batch.len() as u64))
}

async fn count_rows<'e, E>(executor: E, table: &TableName) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT COUNT(*) FROM {}", table.quoted());
    let count = sqlx::query_scalar::<Sqlite, i64>(&sql).fetch_one(executor).await?;
    Ok(count.max(0) as u64)
}
