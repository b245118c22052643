//! Per-operation handler contract.
//!
//! A handler is invoked repeatedly within a slice until its operation reaches
//! its declared size or the slice budget runs out. Each invocation reports a
//! partial [`SliceOutcome`]; the coordinator folds it into the job counters.
//! Handlers must not keep progress in process-local state: everything they
//! need to resume goes through `done` and `context`.

use serde_json::Value as JsonValue;
use thiserror::Error;

use forgebatch_core::JobId;

/// Failure reading the operation's work items.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("work item source failed: {0}")]
pub struct ItemSourceError(pub String);

/// Source of raw work items for the operation being processed.
///
/// Backed by the operation's queue; `shift` removes the returned item.
pub trait ItemSource {
    fn shift(&self) -> Result<Option<String>, ItemSourceError>;
}

/// Arguments of one handler invocation.
pub struct HandlerCall<'a> {
    pub job_id: &'a JobId,
    /// Operation (handler) identifier.
    pub operation: &'a str,
    /// Units already done for this operation, including earlier slices.
    pub done: u64,
    /// Declared size of the operation.
    pub size: u64,
    pub context: &'a JsonValue,
    pub args: &'a [JsonValue],
    items: Option<&'a dyn ItemSource>,
}

impl<'a> HandlerCall<'a> {
    pub fn new(
        job_id: &'a JobId,
        operation: &'a str,
        done: u64,
        size: u64,
        context: &'a JsonValue,
        args: &'a [JsonValue],
    ) -> Self {
        Self {
            job_id,
            operation,
            done,
            size,
            context,
            args,
            items: None,
        }
    }

    pub fn with_items(mut self, items: &'a dyn ItemSource) -> Self {
        self.items = Some(items);
        self
    }

    /// Whether the operation is backed by a queue.
    pub fn has_items(&self) -> bool {
        self.items.is_some()
    }

    /// Remove and return the next work item, `None` when exhausted or when the
    /// operation has no queue.
    pub fn next_item(&self) -> Result<Option<String>, ItemSourceError> {
        match self.items {
            Some(source) => source.shift(),
            None => Ok(None),
        }
    }

    /// Units left before the operation completes.
    pub fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.done)
    }
}

/// How an invocation moved the operation's `done` counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DoneUpdate {
    #[default]
    Unchanged,
    /// Add to the current count.
    Advance(u64),
    /// Replace the current count (non-incremental handlers).
    Set(u64),
}

impl DoneUpdate {
    pub fn apply(self, current: u64) -> u64 {
        match self {
            DoneUpdate::Unchanged => current,
            DoneUpdate::Advance(delta) => current.saturating_add(delta),
            DoneUpdate::Set(value) => value,
        }
    }
}

/// Partial result of one handler invocation. Defaults mean "no change".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliceOutcome {
    pub done: DoneUpdate,
    pub errors: u64,
    pub inserted: u64,
    pub updated: u64,
    /// Patch deep-merged into the job context.
    pub context: Option<JsonValue>,
    /// Overrides the default progress message for this report.
    pub message: Option<String>,
}

impl SliceOutcome {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn advance(delta: u64) -> Self {
        Self {
            done: DoneUpdate::Advance(delta),
            ..Self::default()
        }
    }

    pub fn set_done(done: u64) -> Self {
        Self {
            done: DoneUpdate::Set(done),
            ..Self::default()
        }
    }

    pub fn with_errors(mut self, errors: u64) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_inserted(mut self, inserted: u64) -> Self {
        self.inserted = inserted;
        self
    }

    pub fn with_updated(mut self, updated: u64) -> Self {
        self.updated = updated;
        self
    }

    pub fn with_context(mut self, context: JsonValue) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Processing capability registered for one operation id.
///
/// Item-level failures are reported through `SliceOutcome::errors`, never by
/// panicking: a panic aborts the whole slice and is reported as a crash.
pub trait OperationHandler: Send + Sync {
    fn process(&self, call: &HandlerCall<'_>) -> SliceOutcome;
}

impl<F> OperationHandler for F
where
    F: Fn(&HandlerCall<'_>) -> SliceOutcome + Send + Sync,
{
    fn process(&self, call: &HandlerCall<'_>) -> SliceOutcome {
        self(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct VecSource(RefCell<Vec<String>>);

    impl ItemSource for VecSource {
        fn shift(&self) -> Result<Option<String>, ItemSourceError> {
            Ok(self.0.borrow_mut().pop())
        }
    }

    #[test]
    fn done_update_applies() {
        assert_eq!(DoneUpdate::Unchanged.apply(5), 5);
        assert_eq!(DoneUpdate::Advance(3).apply(5), 8);
        assert_eq!(DoneUpdate::Set(2).apply(5), 2);
        assert_eq!(DoneUpdate::Advance(1).apply(u64::MAX), u64::MAX);
    }

    fn take_two(call: &HandlerCall<'_>) -> SliceOutcome {
        let mut taken = 0;
        while taken < 2 {
            match call.next_item() {
                Ok(Some(_)) => taken += 1,
                _ => break,
            }
        }
        SliceOutcome::advance(taken).with_inserted(taken)
    }

    #[test]
    fn functions_are_handlers() {
        let job_id = JobId::new("job").unwrap();
        let context = JsonValue::Null;
        let source = VecSource(RefCell::new(vec!["a".into(), "b".into(), "c".into()]));
        let call = HandlerCall::new(&job_id, "import", 0, 3, &context, &[]).with_items(&source);

        let outcome = take_two.process(&call);
        assert_eq!(outcome.done, DoneUpdate::Advance(2));
        assert_eq!(outcome.inserted, 2);
        assert_eq!(source.0.borrow().len(), 1);
    }

    #[test]
    fn call_without_queue_yields_no_items() {
        let job_id = JobId::new("job").unwrap();
        let context = JsonValue::Null;
        let call = HandlerCall::new(&job_id, "reindex", 4, 10, &context, &[]);
        assert!(!call.has_items());
        assert_eq!(call.next_item().unwrap(), None);
        assert_eq!(call.remaining(), 6);
    }
}
