//! `forgebatch-jobs` — the batch job domain.
//!
//! Pure model of a resumable batch job: the caller-facing [`JobSpec`], the
//! persisted [`Job`] snapshot, the per-operation handler contract and the
//! progress report returned on every poll. Storage and slice execution live
//! in `forgebatch-infra`.

pub mod context;
pub mod handler;
pub mod job;
pub mod registry;
pub mod report;
pub mod spec;
pub mod template;

pub use handler::{
    DoneUpdate, HandlerCall, ItemSource, ItemSourceError, OperationHandler, SliceOutcome,
};
pub use job::{Job, JobMessages, JobOutcome, JobPhase, Operation, Redirects};
pub use registry::HandlerRegistry;
pub use report::ProgressReport;
pub use spec::{JobSpec, MessageOverrides, OperationSpec, QueuePayload};
pub use template::{TemplateVars, percentage};
