//! Strongly-typed identifiers used across the engine.
//!
//! Jobs and queues are keyed by opaque strings so callers can choose stable,
//! human-readable ids (e.g. `"product-import"`). Generated ids are UUIDv7.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BatchError;

/// Identifier of a batch job (key of its persisted snapshot).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

/// Identifier of a work-item queue.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueId(String);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a fresh identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing ids explicitly in tests
            /// for determinism.
            pub fn generate() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            /// Validate and wrap a caller-supplied identifier.
            pub fn new(value: impl Into<String>) -> Result<Self, BatchError> {
                let value = value.into();
                if value.is_empty() {
                    return Err(BatchError::invalid_id(format!("{}: empty", $name)));
                }
                if value.chars().any(char::is_whitespace) {
                    return Err(BatchError::invalid_id(format!(
                        "{}: '{}' contains whitespace",
                        $name, value
                    )));
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = BatchError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }
    };
}

impl_string_newtype!(JobId, "JobId");
impl_string_newtype!(QueueId, "QueueId");

impl QueueId {
    /// Queue id derived for the operation at `index` of `job`.
    pub fn for_operation(job: &JobId, index: usize, operation: &str) -> Self {
        Self(format!("{job}:{index}:{operation}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(JobId::generate(), JobId::generate());
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        assert!(matches!(JobId::new(""), Err(BatchError::InvalidId(_))));
        assert!(matches!(
            QueueId::from_str("two words"),
            Err(BatchError::InvalidId(_))
        ));
        assert_eq!(JobId::new("import-1").unwrap().as_str(), "import-1");
    }

    #[test]
    fn operation_queue_ids_are_scoped_by_job_and_index() {
        let job = JobId::new("job-a").unwrap();
        let q0 = QueueId::for_operation(&job, 0, "import");
        let q1 = QueueId::for_operation(&job, 1, "import");
        assert_eq!(q0.as_str(), "job-a:0:import");
        assert_ne!(q0, q1);
    }

    #[test]
    fn serializes_transparently() {
        let id = JobId::new("abc").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }
}
