//! Job coordinator: submits jobs and drives them in bounded slices.
//!
//! Every `process()` call loads the snapshot, runs one time-boxed slice of the
//! first pending operation, persists the snapshot and returns a
//! [`ProgressReport`]. Nothing survives between calls except what the stores
//! hold, so any process can pick a job up where the last one left it.
//!
//! ## Slice loop
//!
//! The handler is invoked at least once per slice. After each invocation the
//! result is merged into a [`SliceAccumulator`]; the slice ends when the
//! operation reaches its size (its queue is deleted and the operation is
//! dropped) or when the budget is spent. The budget is only checked between
//! invocations.
//!
//! A queued operation whose queue ran dry while its handler made no progress
//! can never complete; its remaining units are counted as errors and the
//! operation completes.

mod accumulator;
mod error;
mod lease;

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use forgebatch_core::{BatchError, ExpectedVersion, JobId, QueueId};
use forgebatch_jobs::{
    HandlerCall, HandlerRegistry, ItemSource, ItemSourceError, Job, JobPhase, JobSpec, Operation,
    OperationHandler, ProgressReport,
};

use crate::config::EngineConfig;
use crate::queue::QueueStore;
use crate::snapshot::JobSnapshotStore;

pub use accumulator::SliceAccumulator;
pub use error::CoordinatorError;
pub use lease::{JobLease, JobLeases};

/// Work items of one operation, read through its queue.
struct QueueItems<'a, Q: QueueStore + ?Sized> {
    store: &'a Q,
    queue_id: &'a QueueId,
}

impl<Q: QueueStore + ?Sized> ItemSource for QueueItems<'_, Q> {
    fn shift(&self) -> Result<Option<String>, ItemSourceError> {
        self.store
            .shift_item(self.queue_id)
            .map(|item| item.map(|item| item.value))
            .map_err(|e| ItemSourceError(e.to_string()))
    }
}

/// Result of the handler loop of one slice.
struct SliceRun {
    accumulator: SliceAccumulator,
    elapsed: Duration,
}

/// Coordinates batch jobs over a queue store and a snapshot store.
pub struct JobCoordinator<Q: QueueStore, S: JobSnapshotStore> {
    queues: Q,
    snapshots: S,
    registry: Arc<HandlerRegistry>,
    config: EngineConfig,
    leases: JobLeases,
}

impl<Q: QueueStore, S: JobSnapshotStore> JobCoordinator<Q, S> {
    pub fn new(queues: Q, snapshots: S, registry: Arc<HandlerRegistry>) -> Self {
        Self::with_config(queues, snapshots, registry, EngineConfig::default())
    }

    pub fn with_config(
        queues: Q,
        snapshots: S,
        registry: Arc<HandlerRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            queues,
            snapshots,
            registry,
            config,
            leases: JobLeases::new(),
        }
    }

    pub fn queues(&self) -> &Q {
        &self.queues
    }

    pub fn snapshots(&self) -> &S {
        &self.snapshots
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a job: validate it, materialize its queues and persist the
    /// initial snapshot.
    ///
    /// A job whose id already has operations pending is returned unchanged
    /// and nothing is written. A finished job of the same id is replaced.
    pub fn submit(&self, spec: JobSpec) -> Result<Job, CoordinatorError> {
        for operation in &spec.operations {
            if !self.registry.contains(&operation.handler) {
                return Err(BatchError::unknown_handler(operation.handler.clone()).into());
            }
        }

        let (mut job, payloads) = spec.into_job(&self.config.default_redirects)?;
        let _lease = self.leases.acquire(&job.id)?;

        if let Some(existing) = self.snapshots.load(&job.id)? {
            if existing.is_pending() {
                warn!(job_id = %existing.id, "job already pending, ignoring duplicate submission");
                return Ok(existing);
            }
            job.version = existing.version;
        }

        for payload in payloads {
            let fresh = self.queues.create_or_replace(
                &payload.queue_id,
                payload.items,
                payload.total,
                payload.replace,
            )?;
            debug!(job_id = %job.id, queue_id = %payload.queue_id, fresh, "materialized queue");
        }

        self.persist(&mut job)?;
        info!(
            job_id = %job.id,
            title = %job.title,
            operations = job.operations.len(),
            total = job.total,
            "job submitted"
        );
        Ok(job)
    }

    /// Run one slice with the configured budget. `None` for unknown ids.
    pub fn process(&self, job_id: &JobId) -> Result<Option<ProgressReport>, CoordinatorError> {
        self.process_with_budget(job_id, self.config.slice_budget)
    }

    /// Run one slice bounded by `budget`. `None` for unknown ids.
    ///
    /// A handler panic is reported as a crash (`finish = true`, crash message,
    /// error redirect); the snapshot is left as it was before the slice.
    pub fn process_with_budget(
        &self,
        job_id: &JobId,
        budget: Duration,
    ) -> Result<Option<ProgressReport>, CoordinatorError> {
        let _lease = self.leases.acquire(job_id)?;

        let Some(mut job) = self.snapshots.load(job_id)? else {
            return Ok(None);
        };

        if job.is_finished() {
            return Ok(Some(job.report()));
        }

        if !job.active || job.operations.is_empty() {
            self.finish(&mut job)?;
            return Ok(Some(job.report()));
        }

        let Some(operation) = job.current_operation().cloned() else {
            return Ok(Some(job.report()));
        };

        let Some(handler) = self.registry.get(&operation.handler) else {
            warn!(
                job_id = %job.id,
                operation = %operation.handler,
                "no handler registered at process time, halting job"
            );
            job.errors = job.errors.saturating_add(1);
            job.active = false;
            self.finish(&mut job)?;
            return Ok(Some(job.report()));
        };

        let seeded_done = job.operation_done(&operation.key).min(operation.size);
        let run = catch_unwind(AssertUnwindSafe(|| {
            self.run_slice(&job, &operation, handler.as_ref(), budget)
        }));

        let mut run = match run {
            Ok(run) => run,
            Err(panic) => {
                error!(
                    job_id = %job.id,
                    operation = %operation.handler,
                    panic = %panic_message(panic.as_ref()),
                    "slice crashed"
                );
                return Ok(Some(job.crash_report()));
            }
        };

        if !run.accumulator.is_complete()
            && run.accumulator.done == seeded_done
            && self.queue_exhausted(&operation)?
        {
            let written_off = run.accumulator.write_off_remaining();
            warn!(
                job_id = %job.id,
                operation = %operation.key,
                written_off,
                "queue exhausted without progress, counting the remainder as errors"
            );
        }

        let completed = run.accumulator.is_complete();
        debug!(
            job_id = %job.id,
            operation = %operation.key,
            calls = run.accumulator.calls,
            done = run.accumulator.done,
            size = operation.size,
            elapsed_ms = run.elapsed.as_millis() as u64,
            completed,
            "slice ran"
        );

        run.accumulator.apply_to(&mut job, &operation.key);
        job.phase = JobPhase::Processing;

        if completed {
            job.operations.pop_front();
        }

        // Counters become durable before the drained queue goes away, so a
        // failed save never strands the operation without its items.
        if job.operations.is_empty() {
            self.finish(&mut job)?;
        } else {
            self.persist(&mut job)?;
        }

        if completed {
            info!(job_id = %job.id, operation = %operation.key, "operation completed");
            if let Some(queue_id) = &operation.queue {
                if let Err(e) = self.queues.delete(queue_id) {
                    warn!(
                        job_id = %job.id,
                        queue_id = %queue_id,
                        error = %e,
                        "failed to delete drained queue"
                    );
                }
            }
        }

        Ok(Some(job.report()))
    }

    /// Progress report of the persisted snapshot, without running a slice.
    pub fn status(&self, job_id: &JobId) -> Result<Option<ProgressReport>, CoordinatorError> {
        Ok(self.snapshots.load(job_id)?.map(|job| job.report()))
    }

    /// Stop a job: the next `process()` finishes it without invoking handlers.
    ///
    /// Pending queues are kept until [`JobCoordinator::abandon`].
    pub fn halt(&self, job_id: &JobId) -> Result<Option<ProgressReport>, CoordinatorError> {
        let _lease = self.leases.acquire(job_id)?;

        let Some(mut job) = self.snapshots.load(job_id)? else {
            return Ok(None);
        };
        if job.active && !job.is_finished() {
            job.active = false;
            self.persist(&mut job)?;
            info!(job_id = %job.id, "job halted");
        }
        Ok(Some(job.report()))
    }

    /// Delete the queues of every pending operation and the snapshot.
    ///
    /// Returns `false` for unknown ids.
    pub fn abandon(&self, job_id: &JobId) -> Result<bool, CoordinatorError> {
        let _lease = self.leases.acquire(job_id)?;

        let Some(job) = self.snapshots.load(job_id)? else {
            return Ok(false);
        };
        for queue_id in job.pending_queues() {
            self.queues.delete(queue_id)?;
        }
        self.snapshots.delete(job_id)?;
        info!(job_id = %job.id, pending = job.operations.len(), "job abandoned");
        Ok(true)
    }

    /// Whether the operation's queue is gone or has no items left.
    fn queue_exhausted(&self, operation: &Operation) -> Result<bool, CoordinatorError> {
        let Some(queue_id) = &operation.queue else {
            return Ok(false);
        };
        Ok(self
            .queues
            .get(queue_id)?
            .is_none_or(|queue| queue.remaining == 0))
    }

    fn run_slice(
        &self,
        job: &Job,
        operation: &Operation,
        handler: &dyn OperationHandler,
        budget: Duration,
    ) -> SliceRun {
        let started = Instant::now();
        let deadline = started.checked_add(budget);
        let items = operation.queue.as_ref().map(|queue_id| QueueItems {
            store: &self.queues,
            queue_id,
        });

        let mut accumulator = SliceAccumulator::seed(job, operation);
        loop {
            let call = HandlerCall::new(
                &job.id,
                &operation.handler,
                accumulator.done,
                operation.size,
                &accumulator.context,
                &operation.args,
            );
            let call = match &items {
                Some(items) => call.with_items(items),
                None => call,
            };

            let outcome = handler.process(&call);
            accumulator.merge(outcome);

            if accumulator.is_complete() {
                break;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                break;
            }
        }

        SliceRun {
            accumulator,
            elapsed: started.elapsed(),
        }
    }

    fn finish(&self, job: &mut Job) -> Result<(), CoordinatorError> {
        job.finish();
        self.persist(job)?;
        info!(
            job_id = %job.id,
            outcome = ?job.outcome,
            done = job.done_total(),
            total = job.total,
            errors = job.errors,
            "job finished"
        );
        Ok(())
    }

    fn persist(&self, job: &mut Job) -> Result<(), CoordinatorError> {
        job.updated_at = Utc::now();
        job.version = self
            .snapshots
            .save(job, ExpectedVersion::Exact(job.version))?;
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl<Q: QueueStore, S: JobSnapshotStore> std::fmt::Debug for JobCoordinator<Q, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobCoordinator")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
