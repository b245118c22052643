//! Per-poll progress report (the caller-facing polling protocol).

use serde::{Deserialize, Serialize};

use forgebatch_core::JobId;

/// Result of one `process()` (or `status()`) call.
///
/// `finish = true` tells the caller to stop polling and apply `redirect` and
/// the final `message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub job_id: JobId,
    /// Units done across all operations.
    pub done: u64,
    pub errors: u64,
    /// 0-100.
    pub progress: u8,
    pub message: String,
    pub finish: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}
