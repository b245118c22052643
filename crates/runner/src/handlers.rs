//! Demo operation handlers.

use std::thread;
use std::time::Duration;

use serde_json::json;

use forgebatch_core::BatchResult;
use forgebatch_jobs::{HandlerCall, HandlerRegistry, SliceOutcome};

pub const IMPORT_ROWS: &str = "import_rows";
pub const REINDEX: &str = "reindex";
pub const NOTIFY: &str = "notify";

const ROWS_PER_CALL: u64 = 25;
const INDEX_CHUNK: u64 = 40;

pub fn registry() -> BatchResult<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register(IMPORT_ROWS, import_rows)?;
    registry.register(REINDEX, reindex)?;
    registry.register(NOTIFY, notify)?;
    Ok(registry)
}

/// Parses `sku;name;price` rows; malformed rows count as errors.
fn import_rows(call: &HandlerCall<'_>) -> SliceOutcome {
    let limit = call.remaining().min(ROWS_PER_CALL);
    let mut taken = 0;
    let mut errors = 0;

    while taken < limit {
        let row = match call.next_item() {
            Ok(Some(row)) => row,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read import row");
                errors += 1;
                break;
            }
        };
        taken += 1;

        let fields: Vec<&str> = row.split(';').collect();
        let valid = fields.len() == 3 && fields[2].parse::<f64>().is_ok();
        if !valid {
            tracing::debug!(row = %row, "rejected malformed row");
            errors += 1;
        }
    }

    // Simulated write latency.
    thread::sleep(Duration::from_millis(taken));

    SliceOutcome::advance(taken)
        .with_errors(errors)
        .with_inserted(taken.saturating_sub(errors))
}

/// Walks the catalog in chunks, remembering the last indexed position.
fn reindex(call: &HandlerCall<'_>) -> SliceOutcome {
    let position = call.context["reindex"]["position"].as_u64().unwrap_or(0);
    let chunk = call.remaining().min(INDEX_CHUNK);
    thread::sleep(Duration::from_millis(chunk / 2));

    SliceOutcome::advance(chunk)
        .with_updated(chunk)
        .with_context(json!({"reindex": {"position": position + chunk}}))
        .with_message(format!("Reindexed {} of {} products.", call.done + chunk, call.size))
}

fn notify(call: &HandlerCall<'_>) -> SliceOutcome {
    tracing::info!(job_id = %call.job_id, "sending completion notification");
    SliceOutcome::advance(1).with_message("Notification sent.")
}
