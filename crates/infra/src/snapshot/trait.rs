use std::sync::Arc;

use thiserror::Error;

use forgebatch_core::{ExpectedVersion, JobId};
use forgebatch_jobs::Job;

/// Snapshot storage failure.
#[derive(Debug, Clone, Error)]
pub enum SnapshotStoreError {
    #[error("snapshot storage error: {0}")]
    Storage(String),

    #[error("snapshot serialization error: {0}")]
    Serialization(String),

    /// The stored snapshot moved on since it was loaded.
    #[error("snapshot version conflict: {0}")]
    Conflict(String),
}

/// Durable storage of job snapshots keyed by job id.
///
/// Snapshots are written whole; the stored version increments by one on
/// every successful save.
pub trait JobSnapshotStore: Send + Sync {
    /// Load a snapshot; `Job::version` reflects the stored version.
    fn load(&self, job_id: &JobId) -> Result<Option<Job>, SnapshotStoreError>;

    /// Save `job`, returning the new stored version.
    ///
    /// A job that was never saved is at version 0.
    fn save(&self, job: &Job, expected: ExpectedVersion) -> Result<u64, SnapshotStoreError>;

    /// Delete a snapshot. Returns `false` when none was stored.
    fn delete(&self, job_id: &JobId) -> Result<bool, SnapshotStoreError>;
}

impl<S: JobSnapshotStore + ?Sized> JobSnapshotStore for Arc<S> {
    fn load(&self, job_id: &JobId) -> Result<Option<Job>, SnapshotStoreError> {
        (**self).load(job_id)
    }

    fn save(&self, job: &Job, expected: ExpectedVersion) -> Result<u64, SnapshotStoreError> {
        (**self).save(job, expected)
    }

    fn delete(&self, job_id: &JobId) -> Result<bool, SnapshotStoreError> {
        (**self).delete(job_id)
    }
}

pub(crate) fn version_conflict(
    job_id: &JobId,
    expected: ExpectedVersion,
    actual: u64,
) -> SnapshotStoreError {
    SnapshotStoreError::Conflict(format!(
        "job {job_id}: expected {expected:?}, stored version is {actual}"
    ))
}
