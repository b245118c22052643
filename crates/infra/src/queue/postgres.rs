//! Postgres-backed queue store.
//!
//! ## Schema
//!
//! - `batch_queue`: one header row per queue (`queue_id`, `total`, `status`, timestamps)
//! - `batch_queue_item`: work items keyed by a `BIGSERIAL`, cascading on header delete
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | QueueStoreError |
//! |------------|----------------------|-----------------|
//! | Database (any) | any | `Storage` |
//! | PoolClosed | N/A | `Storage` |
//! | Other | N/A | `Storage` |
//!
//! ## Concurrency
//!
//! `shift_item` deletes the oldest item with `FOR UPDATE SKIP LOCKED`, so two
//! workers shifting the same queue never receive the same item.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tokio::runtime::Handle;
use tracing::{Span, instrument};

use forgebatch_core::QueueId;

use super::r#trait::{Queue, QueueFilter, QueueItem, QueueStore, QueueStoreError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS batch_queue (
        queue_id TEXT PRIMARY KEY,
        total BIGINT NOT NULL DEFAULT 0 CHECK (total >= 0),
        status BOOLEAN NOT NULL DEFAULT TRUE,
        created TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        modified TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS batch_queue_item (
        queue_item_id BIGSERIAL PRIMARY KEY,
        queue_id TEXT NOT NULL REFERENCES batch_queue (queue_id) ON DELETE CASCADE,
        value TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS batch_queue_item_queue_idx
        ON batch_queue_item (queue_id, queue_item_id)
    "#,
];

/// Postgres-backed queue store.
///
/// The [`QueueStore`] trait is synchronous; its impl drives the async methods
/// on a tokio runtime handle. Call it from a thread that is not itself a
/// runtime worker (e.g. the thread owning the runtime, or `spawn_blocking`).
#[derive(Debug, Clone)]
pub struct PostgresQueueStore {
    pool: Arc<PgPool>,
    runtime: Option<Handle>,
}

impl PostgresQueueStore {
    /// Uses the ambient tokio runtime for the sync trait methods.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime: None,
        }
    }

    /// Drive the sync trait methods on the given runtime.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Create the queue tables if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), QueueStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    #[instrument(
        skip(self, items),
        fields(queue_id = %queue_id, item_count = items.len(), fresh = tracing::field::Empty),
        err
    )]
    pub async fn create_queue(
        &self,
        queue_id: &QueueId,
        items: Vec<String>,
        total: Option<u64>,
        replace: bool,
    ) -> Result<bool, QueueStoreError> {
        let added_total = total.unwrap_or(items.len() as u64) as i64;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        if replace {
            sqlx::query("DELETE FROM batch_queue WHERE queue_id = $1")
                .bind(queue_id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("replace_queue", e))?;
        }

        // xmax = 0 only for rows created by this statement.
        let row = sqlx::query(
            r#"
            INSERT INTO batch_queue (queue_id, total)
            VALUES ($1, $2)
            ON CONFLICT (queue_id)
            DO UPDATE SET
                total = batch_queue.total + EXCLUDED.total,
                modified = NOW()
            RETURNING (xmax = 0) AS fresh
            "#,
        )
        .bind(queue_id.as_str())
        .bind(added_total)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_queue", e))?;

        let fresh: bool = row
            .try_get("fresh")
            .map_err(|e| QueueStoreError::Storage(format!("failed to read upsert result: {e}")))?;

        if !items.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO batch_queue_item (queue_id, value)
                SELECT $1, item FROM UNNEST($2::text[]) WITH ORDINALITY AS t(item, ord)
                ORDER BY ord
                "#,
            )
            .bind(queue_id.as_str())
            .bind(&items)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_items", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("fresh", fresh);
        Ok(fresh)
    }

    #[instrument(skip(self), fields(queue_id = %queue_id), err)]
    pub async fn load_queue(&self, queue_id: &QueueId) -> Result<Option<Queue>, QueueStoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                q.queue_id,
                q.total,
                q.status,
                q.created,
                q.modified,
                (SELECT COUNT(*) FROM batch_queue_item i WHERE i.queue_id = q.queue_id) AS remaining
            FROM batch_queue q
            WHERE q.queue_id = $1
            "#,
        )
        .bind(queue_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_queue", e))?;

        row.map(|row| {
            QueueRow::from_row(&row)
                .map_err(|e| QueueStoreError::Storage(format!("failed to decode queue row: {e}")))
                .and_then(Queue::try_from)
        })
        .transpose()
    }

    #[instrument(skip(self), fields(queue_id = %queue_id), err)]
    pub async fn shift(&self, queue_id: &QueueId) -> Result<Option<QueueItem>, QueueStoreError> {
        let row = sqlx::query(
            r#"
            DELETE FROM batch_queue_item
            WHERE queue_item_id = (
                SELECT queue_item_id
                FROM batch_queue_item
                WHERE queue_id = $1
                ORDER BY queue_item_id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING queue_item_id, queue_id, value
            "#,
        )
        .bind(queue_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("shift_item", e))?;

        row.map(|row| {
            QueueItemRow::from_row(&row)
                .map_err(|e| QueueStoreError::Storage(format!("failed to decode item row: {e}")))
                .and_then(QueueItem::try_from)
        })
        .transpose()
    }

    #[instrument(skip(self, value), fields(queue_id = %queue_id, by_value = value.is_some()), err)]
    pub async fn delete_items(
        &self,
        queue_id: &QueueId,
        value: Option<&str>,
    ) -> Result<(), QueueStoreError> {
        match value {
            Some(value) => {
                sqlx::query(
                    r#"
                    DELETE FROM batch_queue_item
                    WHERE queue_item_id = (
                        SELECT queue_item_id
                        FROM batch_queue_item
                        WHERE queue_id = $1 AND value = $2
                        ORDER BY queue_item_id
                        LIMIT 1
                    )
                    "#,
                )
                .bind(queue_id.as_str())
                .bind(value)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("delete_item", e))?;
            }
            None => {
                sqlx::query("DELETE FROM batch_queue_item WHERE queue_id = $1")
                    .bind(queue_id.as_str())
                    .execute(&*self.pool)
                    .await
                    .map_err(|e| map_sqlx_error("delete_items", e))?;
            }
        }
        Ok(())
    }

    #[instrument(skip(self), fields(queue_id = %queue_id), err)]
    pub async fn delete_queue(&self, queue_id: &QueueId) -> Result<(), QueueStoreError> {
        // Items go with the header (ON DELETE CASCADE).
        sqlx::query("DELETE FROM batch_queue WHERE queue_id = $1")
            .bind(queue_id.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_queue", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(queue_id = %queue_id), err)]
    pub async fn update_status(
        &self,
        queue_id: &QueueId,
        status: bool,
    ) -> Result<bool, QueueStoreError> {
        let result = sqlx::query(
            "UPDATE batch_queue SET status = $2, modified = NOW() WHERE queue_id = $1",
        )
        .bind(queue_id.as_str())
        .bind(status)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_status", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(queue_count = tracing::field::Empty), err)]
    pub async fn list_queues(&self, filter: &QueueFilter) -> Result<Vec<Queue>, QueueStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                q.queue_id,
                q.total,
                q.status,
                q.created,
                q.modified,
                (SELECT COUNT(*) FROM batch_queue_item i WHERE i.queue_id = q.queue_id) AS remaining
            FROM batch_queue q
            WHERE ($1::boolean IS NULL OR q.status = $1)
            ORDER BY q.created ASC, q.queue_id ASC
            "#,
        )
        .bind(filter.status)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_queues", e))?;

        let mut queues = Vec::with_capacity(rows.len());
        for row in rows {
            let queue_row = QueueRow::from_row(&row)
                .map_err(|e| QueueStoreError::Storage(format!("failed to decode queue row: {e}")))?;
            queues.push(Queue::try_from(queue_row)?);
        }
        Span::current().record("queue_count", queues.len());
        Ok(queues)
    }

    fn runtime(&self) -> Result<Handle, QueueStoreError> {
        match &self.runtime {
            Some(handle) => Ok(handle.clone()),
            None => Handle::try_current().map_err(|_| {
                QueueStoreError::Storage(
                    "PostgresQueueStore requires a tokio runtime handle".to_string(),
                )
            }),
        }
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> QueueStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            QueueStoreError::Storage(format!(
                "database error in {operation} ({code}): {}",
                db_err.message()
            ))
        }
        sqlx::Error::PoolClosed => {
            QueueStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        _ => QueueStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

// SQLx row types

#[derive(Debug)]
struct QueueRow {
    queue_id: String,
    total: i64,
    status: bool,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
    remaining: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for QueueRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(QueueRow {
            queue_id: row.try_get("queue_id")?,
            total: row.try_get("total")?,
            status: row.try_get("status")?,
            created: row.try_get("created")?,
            modified: row.try_get("modified")?,
            remaining: row.try_get("remaining")?,
        })
    }
}

impl TryFrom<QueueRow> for Queue {
    type Error = QueueStoreError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        Ok(Queue {
            queue_id: QueueId::new(row.queue_id)
                .map_err(|e| QueueStoreError::Storage(e.to_string()))?,
            total: row.total.max(0) as u64,
            status: row.status,
            created: row.created,
            modified: row.modified,
            remaining: row.remaining.max(0) as u64,
        })
    }
}

#[derive(Debug)]
struct QueueItemRow {
    queue_item_id: i64,
    queue_id: String,
    value: String,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for QueueItemRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(QueueItemRow {
            queue_item_id: row.try_get("queue_item_id")?,
            queue_id: row.try_get("queue_id")?,
            value: row.try_get("value")?,
        })
    }
}

impl TryFrom<QueueItemRow> for QueueItem {
    type Error = QueueStoreError;

    fn try_from(row: QueueItemRow) -> Result<Self, Self::Error> {
        Ok(QueueItem {
            queue_item_id: row.queue_item_id.max(0) as u64,
            queue_id: QueueId::new(row.queue_id)
                .map_err(|e| QueueStoreError::Storage(e.to_string()))?,
            value: row.value,
        })
    }
}

impl QueueStore for PostgresQueueStore {
    fn create_or_replace(
        &self,
        queue_id: &QueueId,
        items: Vec<String>,
        total: Option<u64>,
        replace: bool,
    ) -> Result<bool, QueueStoreError> {
        self.runtime()?
            .block_on(self.create_queue(queue_id, items, total, replace))
    }

    fn get(&self, queue_id: &QueueId) -> Result<Option<Queue>, QueueStoreError> {
        self.runtime()?.block_on(self.load_queue(queue_id))
    }

    fn shift_item(&self, queue_id: &QueueId) -> Result<Option<QueueItem>, QueueStoreError> {
        self.runtime()?.block_on(self.shift(queue_id))
    }

    fn delete_item(&self, queue_id: &QueueId, value: Option<&str>) -> Result<(), QueueStoreError> {
        self.runtime()?.block_on(self.delete_items(queue_id, value))
    }

    fn delete(&self, queue_id: &QueueId) -> Result<(), QueueStoreError> {
        self.runtime()?.block_on(self.delete_queue(queue_id))
    }

    fn set_status(&self, queue_id: &QueueId, status: bool) -> Result<bool, QueueStoreError> {
        self.runtime()?.block_on(self.update_status(queue_id, status))
    }

    fn list(&self, filter: &QueueFilter) -> Result<Vec<Queue>, QueueStoreError> {
        self.runtime()?.block_on(self.list_queues(filter))
    }
}
