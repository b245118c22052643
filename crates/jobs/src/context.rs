//! Handler continuation context.
//!
//! Handlers return partial context patches; the coordinator folds them into
//! the persisted context with [`deep_merge`].

use serde_json::Value as JsonValue;

/// Recursively merge `patch` into `target`.
///
/// Objects merge key by key; any other value (arrays included) replaces the
/// target value wholesale.
pub fn deep_merge(target: &mut JsonValue, patch: JsonValue) {
    match (target, patch) {
        (JsonValue::Object(existing), JsonValue::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
