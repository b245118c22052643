//! Caller-facing job specification and its normalization into a snapshot.

use std::collections::{BTreeMap, VecDeque};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use forgebatch_core::{BatchError, BatchResult, JobId, QueueId};

use crate::job::{Job, JobMessages, JobPhase, Operation, Redirects};
use crate::registry::is_valid_operation_id;

/// One declared operation of a job spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSpec {
    /// Registered handler id.
    pub handler: String,
    /// Raw work items; materialized into a queue at submit time.
    #[serde(default)]
    pub items: Option<Vec<String>>,
    /// Queue to store the items in; derived from the job id when absent.
    #[serde(default)]
    pub queue_id: Option<QueueId>,
    /// Explicit operation size. Defaults to the item count, or 1 without items.
    #[serde(default)]
    pub size: Option<u64>,
    /// Declared queue total. Defaults to the item count.
    #[serde(default)]
    pub queue_total: Option<u64>,
    /// Append to an existing queue with the same id instead of replacing it.
    #[serde(default)]
    pub append_to_queue: bool,
    #[serde(default)]
    pub args: Vec<JsonValue>,
}

impl OperationSpec {
    pub fn new(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            items: None,
            queue_id: None,
            size: None,
            queue_total: None,
            append_to_queue: false,
            args: Vec::new(),
        }
    }

    pub fn with_items(mut self, items: Vec<String>) -> Self {
        self.items = Some(items);
        self
    }

    pub fn with_queue_id(mut self, queue_id: QueueId) -> Self {
        self.queue_id = Some(queue_id);
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn appending(mut self) -> Self {
        self.append_to_queue = true;
        self
    }

    pub fn with_arg(mut self, arg: JsonValue) -> Self {
        self.args.push(arg);
        self
    }
}

/// Message overrides; `None` keeps the default template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageOverrides {
    pub init: Option<String>,
    pub progress: Option<String>,
    pub success: Option<String>,
    pub error: Option<String>,
    pub halted: Option<String>,
    pub crash: Option<String>,
}

impl MessageOverrides {
    fn apply(self, defaults: JobMessages) -> JobMessages {
        JobMessages {
            init: self.init.unwrap_or(defaults.init),
            progress: self.progress.unwrap_or(defaults.progress),
            success: self.success.unwrap_or(defaults.success),
            error: self.error.unwrap_or(defaults.error),
            halted: self.halted.unwrap_or(defaults.halted),
            crash: self.crash.unwrap_or(defaults.crash),
        }
    }
}

/// A batch job as submitted by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<JobId>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub operations: Vec<OperationSpec>,
    /// Overrides the sum of operation sizes; values below the sum are raised to it.
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub messages: MessageOverrides,
    #[serde(default)]
    pub success_redirect: Option<String>,
    #[serde(default)]
    pub error_redirect: Option<String>,
    /// Initial handler context.
    #[serde(default)]
    pub context: Option<JsonValue>,
}

/// Work items to push into a queue on submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePayload {
    pub queue_id: QueueId,
    pub items: Vec<String>,
    pub total: Option<u64>,
    pub replace: bool,
}

impl JobSpec {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_operation(mut self, operation: OperationSpec) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn with_messages(mut self, messages: MessageOverrides) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_redirects(mut self, success: Option<String>, error: Option<String>) -> Self {
        self.success_redirect = success;
        self.error_redirect = error;
        self
    }

    pub fn with_context(mut self, context: JsonValue) -> Self {
        self.context = Some(context);
        self
    }

    /// Normalize into a fresh snapshot plus the queue payloads to materialize.
    ///
    /// Raw items are moved into the payloads; the snapshot keeps only queue ids.
    /// An id is generated when the spec carries none.
    pub fn into_job(self, default_redirects: &Redirects) -> BatchResult<(Job, Vec<QueuePayload>)> {
        let id = self.id.unwrap_or_else(JobId::generate);

        let mut operations = VecDeque::with_capacity(self.operations.len());
        let mut payloads = Vec::new();
        let mut declared_total: u64 = 0;

        for (index, spec) in self.operations.into_iter().enumerate() {
            if !is_valid_operation_id(&spec.handler) {
                return Err(BatchError::validation(format!(
                    "operation {index} has an invalid handler id '{}'",
                    spec.handler
                )));
            }

            let (queue, size) = match spec.items {
                Some(items) => {
                    let queue_id = spec
                        .queue_id
                        .unwrap_or_else(|| QueueId::for_operation(&id, index, &spec.handler));
                    let size = spec.size.unwrap_or(items.len() as u64);
                    payloads.push(QueuePayload {
                        queue_id: queue_id.clone(),
                        total: spec.queue_total,
                        items,
                        replace: !spec.append_to_queue,
                    });
                    (Some(queue_id), size)
                }
                // An operation may still consume a queue filled by someone else.
                None => (spec.queue_id, spec.size.unwrap_or(1)),
            };

            declared_total = declared_total.saturating_add(size);
            operations.push_back(Operation {
                key: Operation::key_for(index, &spec.handler),
                handler: spec.handler,
                queue,
                size,
                args: spec.args,
            });
        }

        let total = match self.total {
            // Done counts may reach every operation size, so the total never
            // goes below their sum.
            Some(total) if total < declared_total => {
                tracing::warn!(
                    job_id = %id,
                    total,
                    declared_total,
                    "explicit job total is below the sum of operation sizes, using the sum"
                );
                declared_total
            }
            Some(total) => total,
            None => declared_total,
        };

        let done = operations.iter().map(|op| (op.key.clone(), 0)).collect::<BTreeMap<_, _>>();

        let now = Utc::now();
        let job = Job {
            id,
            title: self.title.unwrap_or_else(|| "Processing".to_string()),
            phase: JobPhase::Created,
            active: true,
            operations,
            total,
            done,
            errors: 0,
            inserted: 0,
            updated: 0,
            context: self.context.unwrap_or(JsonValue::Object(Default::default())),
            messages: self.messages.apply(JobMessages::default()),
            redirects: Redirects {
                success: self.success_redirect.or_else(|| default_redirects.success.clone()),
                error: self.error_redirect.or_else(|| default_redirects.error.clone()),
            },
            last_message: None,
            outcome: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        Ok((job, payloads))
    }
}
