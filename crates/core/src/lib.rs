//! `forgebatch-core` — shared building blocks for the batch engine.
//!
//! This crate contains identifiers, the error model and concurrency
//! expectations (no storage or execution concerns).

pub mod error;
pub mod id;
pub mod version;

pub use error::{BatchError, BatchResult};
pub use id::{JobId, QueueId};
pub use version::ExpectedVersion;
