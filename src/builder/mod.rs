//! Builders: functions run as jobs.
//!
//! [`create_builder`] turns a builder function into a job handler. While it
//! runs, the function talks to the runtime through its [`BuilderContext`]:
//! progress reports, logging, nested scheduling and workspace queries.

pub mod builtin;
pub mod context;
pub mod create;
pub mod progress;

pub use context::BuilderContext;
pub use create::{create_builder, Builder, BuilderOutputLike};
pub use progress::ProgressReporter;
