//! The job runtime.
//!
//! A [`Registry`] maps job names to [`JobHandler`]s. The [`Scheduler`] turns a
//! name and an argument into a running [`Job`], which exposes:
//! - an input sink and an output stream (replaying the last output),
//! - an outbound message bus,
//! - named channels such as `progress` and `log` (replaying the last message),
//! - cooperative cancellation through [`Job::stop`].

pub mod error;
pub mod handler;
pub mod job;
pub mod registry;
pub mod scheduler;
pub mod strategy;
pub mod subject;
pub mod types;

pub use error::JobError;
pub use handler::{
    create_job_handler, merge_until_complete, JobChannel, JobHandler, JobHandlerContext,
    JobOutputStream, JobScope,
};
pub use job::Job;
pub use registry::{FallbackRegistry, ModuleJobRegistry, ModuleLoader, Registry, SimpleJobRegistry};
pub use scheduler::{PauseGuard, ScheduleJobOptions, Scheduler};
pub use subject::{EventStream, Notification, Observable, Subject, Subscription};
pub use types::{
    JobDescription, JobId, JobInboundMessage, JobOutboundMessage, JobOutboundMessageKind, JobState,
};
