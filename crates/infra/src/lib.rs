//! Infrastructure layer: queue and snapshot stores, the job coordinator and
//! engine configuration.

pub mod config;
pub mod coordinator;
pub mod queue;
pub mod snapshot;


pub use config::EngineConfig;
pub use coordinator::{CoordinatorError, JobCoordinator};
pub use queue::{InMemoryQueueStore, PostgresQueueStore, QueueStore, QueueStoreError};
pub use snapshot::{InMemorySnapshotStore, JobSnapshotStore, PostgresSnapshotStore, SnapshotStoreError};
