//! Architect - a job and builder execution runtime
//!
//! This crate resolves job names to handlers through registries, runs them
//! with bidirectional messaging and named channels, validates builder options
//! against JSON schemas, and lets builders schedule other builders.

pub mod architect;
pub mod builder;
pub mod core;
pub mod jobs;
pub mod schema;
pub mod util;

/// An in-memory host for tests of builders and of the runtime itself.
pub mod testing;

pub use architect::{Architect, ArchitectError, ArchitectHost, BuilderRun, ScheduleOptions};
pub use builder::{create_builder, Builder, BuilderContext, BuilderOutputLike};
pub use core::{BuilderInfo, BuilderOutput, BuilderProgressReport, BuilderProgressState, JsonObject, Target};
pub use jobs::{Job, JobError, JobState, Scheduler};
pub use util::Logger;
