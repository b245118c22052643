//! Process-wide tracing setup shared by the batch engine binaries.

/// Subscriber configuration (filters, output format).
pub mod subscriber;

pub use subscriber::LogFormat;

/// Initialize process-wide tracing with the format named by `BATCH_LOG_FORMAT`
/// (JSON unless set to `text`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    subscriber::init(LogFormat::from_env());
}
