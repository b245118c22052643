//! The persisted job snapshot.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use forgebatch_core::{JobId, QueueId};

use crate::report::ProgressReport;
use crate::template::{TemplateVars, percentage};

/// Lifecycle phase of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    /// Operations populated, no slice executed yet.
    Created,
    /// One or more slices executed.
    Processing,
    /// Terminal.
    Finished,
}

/// Terminal outcome of a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Success,
    CompletedWithErrors,
    /// Halted with operations still pending.
    Halted,
    /// A slice crashed; the job did not complete properly. Only ever reported,
    /// never persisted.
    Crashed,
}

/// Message templates used for progress and summary reports.
///
/// See [`TemplateVars::render`] for the supported placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessages {
    pub init: String,
    pub progress: String,
    pub success: String,
    pub error: String,
    #[serde(default = "default_halted_message")]
    pub halted: String,
    pub crash: String,
}

fn default_halted_message() -> String {
    "@title was stopped: @current of @total processed.".to_string()
}

impl Default for JobMessages {
    fn default() -> Self {
        Self {
            init: "Initializing.".to_string(),
            progress: "Completed @current of @total.".to_string(),
            success: "@title finished: @current of @total processed.".to_string(),
            error: "@title finished with @errors errors: @current of @total processed.".to_string(),
            halted: default_halted_message(),
            crash: "@title did not complete properly. Check the logs for details.".to_string(),
        }
    }
}

/// Redirect targets applied by the caller once the job finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirects {
    pub success: Option<String>,
    pub error: Option<String>,
}

/// One step of a job, bound to a registered handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique within the job (`"<index>:<handler>"`); keys the `done` map.
    pub key: String,
    /// Registered handler id.
    pub handler: String,
    /// Queue holding the raw work items, if any.
    pub queue: Option<QueueId>,
    /// Units of work after which the operation is complete.
    pub size: u64,
    /// Extra invocation arguments.
    #[serde(default)]
    pub args: Vec<JsonValue>,
}

impl Operation {
    pub fn key_for(index: usize, handler: &str) -> String {
        format!("{index}:{handler}")
    }
}

/// Serializable job snapshot, persisted between `process()` calls.
///
/// Only the coordinator mutates it. Raw work items never live here: they are
/// stored in queues so the snapshot stays small.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub title: String,
    pub phase: JobPhase,
    /// Cleared by `halt`; an inactive job finishes on the next poll.
    pub active: bool,
    /// Pending operations, consumed front to back.
    pub operations: VecDeque<Operation>,
    /// Fixed at creation.
    pub total: u64,
    /// Done counts per operation key, completed operations included.
    pub done: BTreeMap<String, u64>,
    pub errors: u64,
    pub inserted: u64,
    pub updated: u64,
    /// Handler-private continuation state.
    pub context: JsonValue,
    pub messages: JobMessages,
    pub redirects: Redirects,
    pub last_message: Option<String>,
    pub outcome: Option<JobOutcome>,
    /// Bumped on every save; used for optimistic concurrency.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether operations remain to be processed.
    pub fn is_pending(&self) -> bool {
        self.phase != JobPhase::Finished && !self.operations.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.phase == JobPhase::Finished
    }

    pub fn current_operation(&self) -> Option<&Operation> {
        self.operations.front()
    }

    pub fn operation_done(&self, key: &str) -> u64 {
        self.done.get(key).copied().unwrap_or(0)
    }

    /// Units done across all operations.
    pub fn done_total(&self) -> u64 {
        self.done.values().fold(0u64, |acc, d| acc.saturating_add(*d))
    }

    pub fn progress(&self) -> u8 {
        percentage(self.done_total(), self.total)
    }

    /// Queues still owned by pending operations.
    pub fn pending_queues(&self) -> impl Iterator<Item = &QueueId> {
        self.operations.iter().filter_map(|op| op.queue.as_ref())
    }

    pub fn template_vars(&self) -> TemplateVars {
        TemplateVars {
            title: self.title.clone(),
            current: self.done_total().min(self.total),
            total: self.total,
            errors: self.errors,
            inserted: self.inserted,
            updated: self.updated,
        }
    }

    /// Default progress text for the current counters.
    pub fn progress_message(&self) -> String {
        self.template_vars().render(&self.messages.progress)
    }

    /// Move the job to its terminal phase. A job with operations left was
    /// halted; otherwise the outcome follows the accumulated error count.
    pub fn finish(&mut self) {
        let outcome = if !self.operations.is_empty() {
            JobOutcome::Halted
        } else if self.errors > 0 {
            JobOutcome::CompletedWithErrors
        } else {
            JobOutcome::Success
        };
        self.phase = JobPhase::Finished;
        self.outcome = Some(outcome);
        self.last_message = Some(self.summary_message(Some(outcome)));
        self.updated_at = Utc::now();
    }

    fn summary_message(&self, outcome: Option<JobOutcome>) -> String {
        let vars = self.template_vars();
        match outcome {
            Some(JobOutcome::Success) => vars.render(&self.messages.success),
            Some(JobOutcome::CompletedWithErrors) => vars.render(&self.messages.error),
            Some(JobOutcome::Halted) => vars.render(&self.messages.halted),
            Some(JobOutcome::Crashed) => vars.render(&self.messages.crash),
            None => self.progress_message(),
        }
    }

    fn redirect(&self, outcome: Option<JobOutcome>) -> Option<String> {
        match outcome? {
            JobOutcome::Success => self.redirects.success.clone(),
            JobOutcome::CompletedWithErrors | JobOutcome::Halted | JobOutcome::Crashed => {
                self.redirects.error.clone()
            }
        }
    }

    /// Progress of a finished job: every operation ran to its size, or the
    /// counters say how far it got.
    fn finished_progress(&self) -> u8 {
        match self.outcome {
            Some(JobOutcome::Success) | Some(JobOutcome::CompletedWithErrors) => 100,
            _ => self.progress(),
        }
    }

    /// Progress report for the snapshot as it stands.
    pub fn report(&self) -> ProgressReport {
        let finished = self.is_finished();
        let message = match self.phase {
            JobPhase::Created => self.template_vars().render(&self.messages.init),
            JobPhase::Processing => self
                .last_message
                .clone()
                .unwrap_or_else(|| self.progress_message()),
            JobPhase::Finished => self
                .last_message
                .clone()
                .unwrap_or_else(|| self.summary_message(self.outcome)),
        };

        ProgressReport {
            job_id: self.id.clone(),
            done: self.done_total(),
            errors: self.errors,
            progress: if finished { self.finished_progress() } else { self.progress() },
            message,
            finish: finished,
            redirect: if finished { self.redirect(self.outcome) } else { None },
        }
    }

    /// Report for a slice that crashed. The snapshot itself is left untouched.
    pub fn crash_report(&self) -> ProgressReport {
        let outcome = Some(JobOutcome::Crashed);
        ProgressReport {
            job_id: self.id.clone(),
            done: self.done_total(),
            errors: self.errors,
            progress: self.progress(),
            message: self.summary_message(outcome),
            finish: true,
            redirect: self.redirect(outcome),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{JobSpec, OperationSpec};

    fn job_with(items: usize) -> Job {
        let spec = JobSpec::new("Import")
            .with_id(JobId::new("job-1").unwrap())
            .with_operation(OperationSpec::new("import").with_items(
                (0..items).map(|i| format!("row-{i}")).collect(),
            ))
            .with_redirects(Some("/done".into()), Some("/failed".into()));
        let (job, _) = spec.into_job(&Redirects::default()).unwrap();
        job
    }

    #[test]
    fn created_job_reports_init_message() {
        let job = job_with(25);
        let report = job.report();
        assert_eq!(report.message, "Initializing.");
        assert_eq!(report.progress, 0);
        assert!(!report.finish);
        assert_eq!(report.redirect, None);
    }

    #[test]
    fn finish_without_errors_uses_success_path() {
        let mut job = job_with(4);
        job.done.insert("0:import".into(), 4);
        job.operations.clear();
        job.finish();

        let report = job.report();
        assert!(report.finish);
        assert_eq!(report.progress, 100);
        assert_eq!(report.message, "Import finished: 4 of 4 processed.");
        assert_eq!(report.redirect.as_deref(), Some("/done"));
        assert_eq!(job.outcome, Some(JobOutcome::Success));
    }

    #[test]
    fn finish_with_errors_uses_error_path() {
        let mut job = job_with(4);
        job.done.insert("0:import".into(), 4);
        job.errors = 3;
        job.operations.clear();
        job.finish();

        let report = job.report();
        assert_eq!(report.errors, 3);
        assert_eq!(
            report.message,
            "Import finished with 3 errors: 4 of 4 processed."
        );
        assert_eq!(report.redirect.as_deref(), Some("/failed"));
    }

    #[test]
    fn halted_job_reports_partial_progress_on_error_path() {
        let mut job = job_with(4);
        job.done.insert("0:import".into(), 1);
        job.active = false;
        job.finish();

        let report = job.report();
        assert_eq!(job.outcome, Some(JobOutcome::Halted));
        assert!(report.finish);
        assert_eq!(report.done, 1);
        assert_eq!(report.progress, 25);
        assert_eq!(report.message, "Import was stopped: 1 of 4 processed.");
        assert_eq!(report.redirect.as_deref(), Some("/failed"));
    }

    #[test]
    fn crash_report_keeps_snapshot_counters() {
        let mut job = job_with(10);
        job.done.insert("0:import".into(), 5);
        let report = job.crash_report();
        assert!(report.finish);
        assert_eq!(report.done, 5);
        assert_eq!(report.progress, 50);
        assert_eq!(report.redirect.as_deref(), Some("/failed"));
        assert!(report.message.contains("did not complete properly"));
        assert!(job.outcome.is_none());
    }

    #[test]
    fn snapshot_survives_json_round_trip() {
        let job = job_with(3);
        let json = serde_json::to_value(&job).unwrap();
        assert!(json.get("operations").is_some());
        let back: Job = serde_json::from_value(json).unwrap();
        assert_eq!(back, job);
    }
}
