//! Postgres-backed job snapshot store.
//!
//! Snapshots live in `batch_job_snapshot` as JSONB, one row per job. Saves
//! lock the row (`SELECT ... FOR UPDATE`) before the version check, so two
//! concurrent saves against the same version cannot both succeed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tokio::runtime::Handle;
use tracing::instrument;

use forgebatch_core::{ExpectedVersion, JobId};
use forgebatch_jobs::Job;

use super::r#trait::{JobSnapshotStore, SnapshotStoreError, version_conflict};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS batch_job_snapshot (
        job_id TEXT PRIMARY KEY,
        version BIGINT NOT NULL CHECK (version > 0),
        state JSONB NOT NULL,
        finished BOOLEAN NOT NULL DEFAULT FALSE,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
"#;

#[derive(Debug, Clone)]
pub struct PostgresSnapshotStore {
    pool: Arc<PgPool>,
    runtime: Option<Handle>,
}

impl PostgresSnapshotStore {
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

    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), SnapshotStoreError> {
        sqlx::query(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    pub async fn load_snapshot(&self, job_id: &JobId) -> Result<Option<Job>, SnapshotStoreError> {
        let row = sqlx::query(
            r#"
            SELECT job_id, version, state, updated_at
            FROM batch_job_snapshot
            WHERE job_id = $1
            "#,
        )
        .bind(job_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_snapshot", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let snapshot = SnapshotRow::from_row(&row)
            .map_err(|e| SnapshotStoreError::Storage(format!("failed to decode snapshot row: {e}")))?;
        snapshot.into_job().map(Some)
    }

    #[instrument(
        skip(self, job),
        fields(job_id = %job.id, expected = ?expected),
        err
    )]
    pub async fn store_snapshot(
        &self,
        job: &Job,
        expected: ExpectedVersion,
    ) -> Result<u64, SnapshotStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let current: Option<i64> = sqlx::query(
            "SELECT version FROM batch_job_snapshot WHERE job_id = $1 FOR UPDATE",
        )
        .bind(job.id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("check_version", e))?
        .map(|row| row.try_get("version"))
        .transpose()
        .map_err(|e| SnapshotStoreError::Storage(format!("failed to read version: {e}")))?;

        let current = current.unwrap_or(0).max(0) as u64;
        if !expected.matches(current) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(version_conflict(&job.id, expected, current));
        }

        let version = current + 1;
        let mut stored = job.clone();
        stored.version = version;
        let state = serde_json::to_value(&stored)
            .map_err(|e| SnapshotStoreError::Serialization(e.to_string()))?;

        // A first save has no row to lock: a concurrent first save of the same
        // job fails the primary key (23505) instead.
        let statement = if current == 0 {
            r#"
            INSERT INTO batch_job_snapshot (job_id, version, state, finished)
            VALUES ($1, $2, $3, $4)
            "#
        } else {
            r#"
            UPDATE batch_job_snapshot
            SET version = $2, state = $3, finished = $4, updated_at = NOW()
            WHERE job_id = $1 AND version = $5
            "#
        };

        let mut query = sqlx::query(statement)
            .bind(job.id.as_str())
            .bind(version as i64)
            .bind(&state)
            .bind(stored.is_finished());
        if current > 0 {
            query = query.bind(current as i64);
        }
        let result = query
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("store_snapshot", e))?;

        if let Err(conflict) = ensure_written(result.rows_affected(), &job.id, expected, current) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(conflict);
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(version)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    pub async fn delete_snapshot(&self, job_id: &JobId) -> Result<bool, SnapshotStoreError> {
        let result = sqlx::query("DELETE FROM batch_job_snapshot WHERE job_id = $1")
            .bind(job_id.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_snapshot", e))?;
        Ok(result.rows_affected() > 0)
    }

    fn runtime(&self) -> Result<Handle, SnapshotStoreError> {
        match &self.runtime {
            Some(handle) => Ok(handle.clone()),
            None => Handle::try_current().map_err(|_| {
                SnapshotStoreError::Storage(
                    "PostgresSnapshotStore requires a tokio runtime handle".to_string(),
                )
            }),
        }
    }
}

/// A save that touched no row lost a race against another writer.
fn ensure_written(
    rows_affected: u64,
    job_id: &JobId,
    expected: ExpectedVersion,
    current: u64,
) -> Result<(), SnapshotStoreError> {
    if rows_affected == 0 {
        Err(version_conflict(job_id, expected, current))
    } else {
        Ok(())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> SnapshotStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                // Unique violation: another writer created the row first.
                Some("23505") => SnapshotStoreError::Conflict(msg),
                _ => SnapshotStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            SnapshotStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        _ => SnapshotStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

// SQLx row types

#[derive(Debug)]
struct SnapshotRow {
    job_id: String,
    version: i64,
    state: serde_json::Value,
    #[allow(dead_code)]
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for SnapshotRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(SnapshotRow {
            job_id: row.try_get("job_id")?,
            version: row.try_get("version")?,
            state: row.try_get("state")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl SnapshotRow {
    fn into_job(self) -> Result<Job, SnapshotStoreError> {
        let mut job: Job = serde_json::from_value(self.state).map_err(|e| {
            SnapshotStoreError::Serialization(format!("job {}: {e}", self.job_id))
        })?;
        job.version = self.version.max(0) as u64;
        Ok(job)
    }
}

impl JobSnapshotStore for PostgresSnapshotStore {
    fn load(&self, job_id: &JobId) -> Result<Option<Job>, SnapshotStoreError> {
        self.runtime()?.block_on(self.load_snapshot(job_id))
    }

    fn save(&self, job: &Job, expected: ExpectedVersion) -> Result<u64, SnapshotStoreError> {
        self.runtime()?.block_on(self.store_snapshot(job, expected))
    }

    fn delete(&self, job_id: &JobId) -> Result<bool, SnapshotStoreError> {
        self.runtime()?.block_on(self.delete_snapshot(job_id))
    }
}
