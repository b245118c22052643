use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use forgebatch_core::QueueId;
use forgebatch_jobs::percentage;

/// Queue header plus a live count of the items still stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queue {
    pub queue_id: QueueId,
    /// Declared total; accumulates when items are appended.
    pub total: u64,
    pub status: bool,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub remaining: u64,
}

impl Queue {
    /// `round((1 - remaining / total) * 100)`, clamped to [0, 100].
    pub fn progress(&self) -> u8 {
        percentage(self.total.saturating_sub(self.remaining), self.total)
    }
}

/// One raw work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub queue_item_id: u64,
    pub queue_id: QueueId,
    pub value: String,
}

/// Filter for [`QueueStore::list`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFilter {
    pub status: Option<bool>,
}

impl QueueFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(status: bool) -> Self {
        Self {
            status: Some(status),
        }
    }

    pub fn matches(&self, queue: &Queue) -> bool {
        self.status.is_none_or(|s| s == queue.status)
    }
}

/// Queue storage failure.
///
/// Unknown queue ids are never errors; only the backend failing is.
#[derive(Debug, Clone, Error)]
pub enum QueueStoreError {
    #[error("queue storage error: {0}")]
    Storage(String),
}

/// Durable storage of named queues and their work items.
///
/// Operations on unknown queue ids are no-ops returning empty results.
pub trait QueueStore: Send + Sync {
    /// Create a queue and bulk-insert `items`.
    ///
    /// With `replace`, an existing queue of the same id is deleted first.
    /// Otherwise an existing queue keeps its items, the new ones are appended
    /// and `total` accumulates. `total` defaults to the number of items.
    ///
    /// Returns `true` when a fresh header was written, `false` when the items
    /// were appended to an existing queue.
    fn create_or_replace(
        &self,
        queue_id: &QueueId,
        items: Vec<String>,
        total: Option<u64>,
        replace: bool,
    ) -> Result<bool, QueueStoreError>;

    /// Header plus live remaining count, `None` for unknown ids.
    fn get(&self, queue_id: &QueueId) -> Result<Option<Queue>, QueueStoreError>;

    /// Atomically remove and return one item of the queue.
    fn shift_item(&self, queue_id: &QueueId) -> Result<Option<QueueItem>, QueueStoreError>;

    /// Delete one item matching `value`, or every item when `value` is `None`.
    fn delete_item(&self, queue_id: &QueueId, value: Option<&str>) -> Result<(), QueueStoreError>;

    /// Delete the header and all items.
    fn delete(&self, queue_id: &QueueId) -> Result<(), QueueStoreError>;

    /// Update the status flag. Returns `false` for unknown ids.
    fn set_status(&self, queue_id: &QueueId, status: bool) -> Result<bool, QueueStoreError>;

    fn list(&self, filter: &QueueFilter) -> Result<Vec<Queue>, QueueStoreError>;
}

impl<S: QueueStore + ?Sized> QueueStore for Arc<S> {
    fn create_or_replace(
        &self,
        queue_id: &QueueId,
        items: Vec<String>,
        total: Option<u64>,
        replace: bool,
    ) -> Result<bool, QueueStoreError> {
        (**self).create_or_replace(queue_id, items, total, replace)
    }

    fn get(&self, queue_id: &QueueId) -> Result<Option<Queue>, QueueStoreError> {
        (**self).get(queue_id)
    }

    fn shift_item(&self, queue_id: &QueueId) -> Result<Option<QueueItem>, QueueStoreError> {
        (**self).shift_item(queue_id)
    }

    fn delete_item(&self, queue_id: &QueueId, value: Option<&str>) -> Result<(), QueueStoreError> {
        (**self).delete_item(queue_id, value)
    }

    fn delete(&self, queue_id: &QueueId) -> Result<(), QueueStoreError> {
        (**self).delete(queue_id)
    }

    fn set_status(&self, queue_id: &QueueId, status: bool) -> Result<bool, QueueStoreError> {
        (**self).set_status(queue_id, status)
    }

    fn list(&self, filter: &QueueFilter) -> Result<Vec<Queue>, QueueStoreError> {
        (**self).list(filter)
    }
}
