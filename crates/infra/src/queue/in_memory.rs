use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use forgebatch_core::QueueId;

use super::r#trait::{Queue, QueueFilter, QueueItem, QueueStore, QueueStoreError};

#[derive(Debug)]
struct QueueRecord {
    total: u64,
    status: bool,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
    /// Keyed by item id, so shifting pops the oldest item first.
    items: BTreeMap<u64, String>,
}

impl QueueRecord {
    fn snapshot(&self, queue_id: &QueueId) -> Queue {
        Queue {
            queue_id: queue_id.clone(),
            total: self.total,
            status: self.status,
            created: self.created,
            modified: self.modified,
            remaining: self.items.len() as u64,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    queues: HashMap<QueueId, QueueRecord>,
    next_item_id: u64,
}

/// In-memory queue store.
///
/// Intended for tests/dev. All mutations happen under one write lock, so
/// `shift_item` is an atomic remove-and-return.
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    inner: RwLock<Inner>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items stored for `queue_id` (0 for unknown ids).
    pub fn item_count(&self, queue_id: &QueueId) -> usize {
        self.inner
            .read()
            .map(|inner| inner.queues.get(queue_id).map_or(0, |q| q.items.len()))
            .unwrap_or(0)
    }
}

fn poisoned() -> QueueStoreError {
    QueueStoreError::Storage("lock poisoned".to_string())
}

impl QueueStore for InMemoryQueueStore {
    fn create_or_replace(
        &self,
        queue_id: &QueueId,
        items: Vec<String>,
        total: Option<u64>,
        replace: bool,
    ) -> Result<bool, QueueStoreError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let now = Utc::now();
        let added_total = total.unwrap_or(items.len() as u64);

        if replace {
            inner.queues.remove(queue_id);
        }

        let mut next_id = inner.next_item_id;
        let fresh = !inner.queues.contains_key(queue_id);
        let record = inner
            .queues
            .entry(queue_id.clone())
            .or_insert_with(|| QueueRecord {
                total: 0,
                status: true,
                created: now,
                modified: now,
                items: BTreeMap::new(),
            });

        record.total = record.total.saturating_add(added_total);
        record.modified = now;
        for value in items {
            next_id += 1;
            record.items.insert(next_id, value);
        }
        inner.next_item_id = next_id;

        Ok(fresh)
    }

    fn get(&self, queue_id: &QueueId) -> Result<Option<Queue>, QueueStoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.queues.get(queue_id).map(|r| r.snapshot(queue_id)))
    }

    fn shift_item(&self, queue_id: &QueueId) -> Result<Option<QueueItem>, QueueStoreError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let Some(record) = inner.queues.get_mut(queue_id) else {
            return Ok(None);
        };
        Ok(record.items.pop_first().map(|(id, value)| QueueItem {
            queue_item_id: id,
            queue_id: queue_id.clone(),
            value,
        }))
    }

    fn delete_item(&self, queue_id: &QueueId, value: Option<&str>) -> Result<(), QueueStoreError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let Some(record) = inner.queues.get_mut(queue_id) else {
            return Ok(());
        };
        match value {
            Some(value) => {
                let found = record
                    .items
                    .iter()
                    .find(|(_, v)| v.as_str() == value)
                    .map(|(id, _)| *id);
                if let Some(id) = found {
                    record.items.remove(&id);
                }
            }
            None => record.items.clear(),
        }
        record.modified = Utc::now();
        Ok(())
    }

    fn delete(&self, queue_id: &QueueId) -> Result<(), QueueStoreError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        inner.queues.remove(queue_id);
        Ok(())
    }

    fn set_status(&self, queue_id: &QueueId, status: bool) -> Result<bool, QueueStoreError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        match inner.queues.get_mut(queue_id) {
            Some(record) => {
                record.status = status;
                record.modified = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn list(&self, filter: &QueueFilter) -> Result<Vec<Queue>, QueueStoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        let mut result: Vec<_> = inner
            .queues
            .iter()
            .map(|(id, r)| r.snapshot(id))
            .filter(|q| filter.matches(q))
            .collect();
        result.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.queue_id.cmp(&b.queue_id)));
        Ok(result)
    }
}
