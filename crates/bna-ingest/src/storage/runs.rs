//! Run history (`etl_runs`)
//!
//! One row per source per run: when it ran, how it ended and what it wrote.

use super::{StorageError, StorageWriter, TableName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// `success`, `partial` or `failed`
    pub status: String,
    pub pages: u32,
    pub normalized: u64,
    pub skipped: u64,
    pub inserted: u64,
    pub overridden: u64,
    pub retained: u64,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl RunRecord {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let count = |column: &str| -> Result<u64, sqlx::Error> {
            let value: i64 = row.try_get(column)?;
            Ok(value.max(0) as u64)
        };
        Ok(Self {
            id: Uuid::parse_str(&id).map_err(|e| sqlx::Error::ColumnDecode {
                index: "id".to_string(),
                source: Box::new(e),
            })?,
            source: row.try_get("source")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            status: row.try_get("status")?,
            pages: u32::try_from(count("pages")?).unwrap_or(u32::MAX),
            normalized: count("normalized")?,
            skipped: count("skipped")?,
            inserted: count("inserted")?,
            overridden: count("overridden")?,
            retained: count("retained")?,
            error_kind: row.try_get("error_kind")?,
            error_message: row.try_get("error_message")?,
        })
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl StorageWriter {
    pub async fn ensure_runs_table(&self, table: &TableName) -> Result<(), StorageError> {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {t} (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                status TEXT NOT NULL,
                pages INTEGER NOT NULL,
                normalized INTEGER NOT NULL,
                skipped INTEGER NOT NULL,
                inserted INTEGER NOT NULL,
                overridden INTEGER NOT NULL,
                retained INTEGER NOT NULL,
                error_kind TEXT,
                error_message TEXT
            )
            "#,
            t = table.quoted()
        );
        self.pool().execute(ddl.as_str()).await?;

        let index = format!(
            "CREATE INDEX IF NOT EXISTS \"idx_{}_started_at\" ON {} (started_at)",
            table.as_str(),
            table.quoted()
        );
        self.pool().execute(index.as_str()).await?;
        Ok(())
    }

    pub async fn record_run(&self, table: &TableName, run: &RunRecord) -> Result<(), StorageError> {
        let sql = format!(
            r#"
            INSERT INTO {} (id, source, started_at, finished_at, status, pages, normalized,
                            skipped, inserted, overridden, retained, error_kind, error_message)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            table.quoted()
        );
        sqlx::query(&sql)
            .bind(run.id.to_string())
            .bind(&run.source)
            .bind(run.started_at)
            .bind(run.finished_at)
            .bind(&run.status)
            .bind(i64::from(run.pages))
            .bind(to_i64(run.normalized))
            .bind(to_i64(run.skipped))
            .bind(to_i64(run.inserted))
            .bind(to_i64(run.overridden))
            .bind(to_i64(run.retained))
            .bind(&run.error_kind)
            .bind(&run.error_message)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Most recent runs first
    pub async fn recent_runs(
        &self,
        table: &TableName,
        limit: u32,
    ) -> Result<Vec<RunRecord>, StorageError> {
        let sql = format!(
            "SELECT * FROM {} ORDER BY started_at DESC, source ASC LIMIT ?1",
            table.quoted()
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .await?;
        let runs = rows.iter().map(RunRecord::from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }
}
