//! Queue storage for raw work items.
//!
//! Queues keep the snapshot small: a job's operations reference queues by id
//! and handlers consume items one at a time through `shift_item`.

mod r#trait;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryQueueStore;
pub use postgres::PostgresQueueStore;
pub use r#trait::{Queue, QueueFilter, QueueItem, QueueStore, QueueStoreError};
