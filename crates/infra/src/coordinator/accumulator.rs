//! Slice-local accumulation of handler results.

use serde_json::Value as JsonValue;
use tracing::warn;

use forgebatch_jobs::context::deep_merge;
use forgebatch_jobs::{DoneUpdate, Job, Operation, SliceOutcome};

/// Counters of one slice, seeded from the persisted snapshot.
///
/// Nothing reaches the snapshot until [`SliceAccumulator::apply_to`], so a
/// slice that crashes leaves the snapshot as it was.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceAccumulator {
    pub done: u64,
    pub size: u64,
    pub errors: u64,
    pub inserted: u64,
    pub updated: u64,
    pub context: JsonValue,
    pub message: Option<String>,
    pub calls: u64,
}

impl SliceAccumulator {
    pub fn seed(job: &Job, operation: &Operation) -> Self {
        Self {
            done: job.operation_done(&operation.key).min(operation.size),
            size: operation.size,
            errors: job.errors,
            inserted: job.inserted,
            updated: job.updated,
            context: job.context.clone(),
            message: None,
            calls: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.done >= self.size
    }

    /// Fold one handler invocation into the slice.
    ///
    /// `done` stays within `[current, size]`: over-reports are clamped to the
    /// operation size and absolute updates never move it backwards.
    pub fn merge(&mut self, outcome: SliceOutcome) {
        self.calls += 1;

        let reported = outcome.done.apply(self.done);
        self.done = if reported > self.size {
            warn!(
                reported,
                size = self.size,
                "handler reported more work than the operation size, clamping"
            );
            self.size
        } else if reported < self.done {
            if let DoneUpdate::Set(value) = outcome.done {
                warn!(value, done = self.done, "handler tried to move done backwards, ignoring");
            }
            self.done
        } else {
            reported
        };

        self.errors = self.errors.saturating_add(outcome.errors);
        self.inserted = self.inserted.saturating_add(outcome.inserted);
        self.updated = self.updated.saturating_add(outcome.updated);

        if let Some(patch) = outcome.context {
            deep_merge(&mut self.context, patch);
        }
        if outcome.message.is_some() {
            self.message = outcome.message;
        }
    }

    /// Complete the operation, counting every unit still missing as an error.
    /// Returns the number of units written off.
    pub fn write_off_remaining(&mut self) -> u64 {
        let missing = self.size.saturating_sub(self.done);
        self.errors = self.errors.saturating_add(missing);
        self.done = self.size;
        missing
    }

    /// Write the slice counters onto the snapshot.
    ///
    /// The last handler message wins; otherwise the progress template is
    /// rendered from the updated counters.
    pub fn apply_to(self, job: &mut Job, operation_key: &str) {
        job.done.insert(operation_key.to_string(), self.done);
        job.errors = self.errors;
        job.inserted = self.inserted;
        job.updated = self.updated;
        job.context = self.context;
        job.last_message = Some(match self.message {
            Some(message) => message,
            None => job.progress_message(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgebatch_core::JobId;
    use forgebatch_jobs::{JobSpec, OperationSpec, Redirects};
    use proptest::prelude::*;
    use serde_json::json;

    fn job(size: u64) -> Job {
        let (job, _) = JobSpec::new("Import")
            .with_id(JobId::new("acc").unwrap())
            .with_operation(OperationSpec::new("import").with_size(size))
            .with_context(json!({"cursor": {"offset": 0, "file": "a.csv"}}))
            .into_job(&Redirects::default())
            .unwrap();
        job
    }

    #[test]
    fn merges_counters_and_context() {
        let job = job(10);
        let op = job.operations[0].clone();
        let mut acc = SliceAccumulator::seed(&job, &op);

        acc.merge(
            SliceOutcome::advance(4)
                .with_errors(1)
                .with_inserted(3)
                .with_context(json!({"cursor": {"offset": 4}})),
        );
        acc.merge(SliceOutcome::advance(2).with_updated(2).with_message("Imported 6 rows"));

        assert_eq!(acc.done, 6);
        assert_eq!(acc.errors, 1);
        assert_eq!(acc.inserted, 3);
        assert_eq!(acc.updated, 2);
        assert_eq!(acc.calls, 2);
        assert_eq!(acc.context, json!({"cursor": {"offset": 4, "file": "a.csv"}}));
        assert_eq!(acc.message.as_deref(), Some("Imported 6 rows"));
        assert!(!acc.is_complete());
    }

    #[test]
    fn over_reported_done_is_clamped() {
        let job = job(5);
        let op = job.operations[0].clone();
        let mut acc = SliceAccumulator::seed(&job, &op);
        acc.merge(SliceOutcome::advance(9));
        assert_eq!(acc.done, 5);
        assert!(acc.is_complete());
    }

    #[test]
    fn absolute_updates_replace_but_never_rewind() {
        let job = job(10);
        let op = job.operations[0].clone();
        let mut acc = SliceAccumulator::seed(&job, &op);
        acc.merge(SliceOutcome::set_done(7));
        assert_eq!(acc.done, 7);
        acc.merge(SliceOutcome::set_done(3));
        assert_eq!(acc.done, 7);
    }

    #[test]
    fn apply_renders_progress_message_without_handler_message() {
        let mut job = job(10);
        let op = job.operations[0].clone();
        let mut acc = SliceAccumulator::seed(&job, &op);
        acc.merge(SliceOutcome::advance(4));
        acc.apply_to(&mut job, &op.key);

        assert_eq!(job.operation_done(&op.key), 4);
        assert_eq!(job.last_message.as_deref(), Some("Completed 4 of 10."));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        /// Property: whatever handlers report, done stays within the
        /// operation size and never decreases.
        #[test]
        fn done_stays_bounded_and_monotonic(
            size in 0u64..500,
            updates in prop::collection::vec((any::<bool>(), 0u64..200), 1..40),
        ) {
            let job = job(size);
            let op = job.operations[0].clone();
            let mut acc = SliceAccumulator::seed(&job, &op);
            let mut previous = acc.done;
            for (absolute, value) in updates {
                let outcome = if absolute {
                    SliceOutcome::set_done(value)
                } else {
                    SliceOutcome::advance(value)
                };
                acc.merge(outcome);
                prop_assert!(acc.done <= size);
                prop_assert!(acc.done >= previous);
                previous = acc.done;
            }
        }
    }
}
