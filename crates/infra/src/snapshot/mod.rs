//! Persistence of job snapshots between `process()` calls.

mod r#trait;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemorySnapshotStore;
pub use postgres::PostgresSnapshotStore;
pub use r#trait::{JobSnapshotStore, SnapshotStoreError};
