use thiserror::Error;

use forgebatch_core::BatchError;

use crate::queue::QueueStoreError;
use crate::snapshot::SnapshotStoreError;

/// Failure of a coordinator operation.
///
/// Handler-level failures never show up here: they are counted into the
/// job's `errors` or reported as a crash.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Queue(#[from] QueueStoreError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotStoreError),

    #[error("job lease table poisoned")]
    LeasePoisoned,
}
