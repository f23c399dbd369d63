//! Builder context - the capabilities handed to running builder code.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::architect::api::{schedule_by_name, schedule_by_target, BuilderRun, ScheduleByNameOptions, ScheduleOptions};
use crate::architect::error::ArchitectError;
use crate::architect::host::ProjectRef;
use crate::architect::meta_jobs;
use crate::builder::progress::ProgressReporter;
use crate::core::builder_types::{BuilderInfo, BuilderInput};
use crate::core::options::{as_object, JsonObject};
use crate::core::target::{target_string_from_target, Target};
use crate::jobs::handler::{JobChannel, JobScope};
use crate::jobs::scheduler::Scheduler;
use crate::jobs::subject::Notification;
use crate::util::logging::Logger;

/// Capabilities of a running builder. One context exists per builder input.
///
/// Cheap to clone, so it can be moved into the futures and streams a builder
/// returns.
#[derive(Clone)]
pub struct BuilderContext {
    /// Run identifier
    pub id: u64,

    /// The builder being run
    pub builder: BuilderInfo,

    /// Target being run, if scheduled by target
    pub target: Option<Target>,

    pub workspace_root: String,

    pub current_directory: String,

    logger: Logger,
    reporter: Arc<ProgressReporter>,
    scheduler: Scheduler,
    scope: JobScope,
    progress: JobChannel,
    parents: Vec<String>,
}

impl fmt::Debug for BuilderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderContext")
            .field("id", &self.id)
            .field("builder", &self.builder.builder_name)
            .field("target", &self.target)
            .field("workspace_root", &self.workspace_root)
            .field("current_directory", &self.current_directory)
            .finish()
    }
}

impl BuilderContext {
    pub(crate) fn new(
        input: BuilderInput,
        logger: Logger,
        reporter: Arc<ProgressReporter>,
        scheduler: Scheduler,
        scope: JobScope,
        progress: JobChannel,
    ) -> Self {
        BuilderContext {
            id: input.id,
            builder: input.info,
            target: input.target,
            workspace_root: input.workspace_root,
            current_directory: input.current_directory,
            logger,
            reporter,
            scheduler,
            scope,
            progress,
            parents: input.parents,
        }
    }

    /// Logger whose entries are delivered to the run's `log` channel.
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Enter the running state. See [`ProgressReporter::report_running`].
    pub fn report_running(&self) {
        self.reporter.report_running();
    }

    /// Mark the run as waiting on other work, such as runs it scheduled.
    pub fn report_waiting(&self, status: Option<String>) {
        self.reporter.report_waiting(status);
    }

    /// Update the status text of the run.
    pub fn report_status(&self, status: impl Into<String>) {
        self.reporter.report_status(status);
    }

    /// Update progress counters of the run.
    pub fn report_progress(&self, current: u64, total: Option<u64>, status: Option<String>) {
        self.reporter.report_progress(current, total, status);
    }

    /// Register a callback run when the job ends or is stopped.
    pub fn add_teardown<F, Fut>(&self, teardown: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.scope.add_teardown(teardown);
    }

    /// Schedule a target as a child of this run.
    ///
    /// The child's progress is forwarded into this run's `progress` channel,
    /// and the child is stopped when this job ends. Scheduling a target that
    /// is already running higher up in the chain fails instead of deadlocking.
    pub async fn schedule_target(
        &self,
        target: &Target,
        overrides: JsonObject,
        options: ScheduleOptions,
    ) -> Result<BuilderRun, ArchitectError> {
        let requested = target_string_from_target(target);
        let chain = self.chain();
        if chain.contains(&requested) {
            let mut cycle = chain;
            cycle.push(requested.clone());
            return Err(ArchitectError::ScheduleCycle {
                target: requested,
                chain: cycle.join(" -> "),
            });
        }

        let run = schedule_by_target(target, overrides, self.child_options(options, chain)).await?;
        self.adopt(&run);
        Ok(run)
    }

    /// Schedule a builder by name as a child of this run.
    pub async fn schedule_builder(
        &self,
        builder_name: &str,
        options: JsonObject,
        schedule_options: ScheduleOptions,
    ) -> Result<BuilderRun, ArchitectError> {
        let chain = self.chain();
        let run = schedule_by_name(builder_name, options, self.child_options(schedule_options, chain)).await?;
        self.adopt(&run);
        Ok(run)
    }

    /// Resolved workspace options of a target.
    pub async fn get_target_options(&self, target: &Target) -> Result<JsonObject, ArchitectError> {
        let value = meta_jobs::run(&self.scheduler, meta_jobs::GET_TARGET_OPTIONS, serde_json::to_value(target)?).await?;
        Ok(as_object(&value))
    }

    /// Metadata of a project, by name or through one of its targets.
    pub async fn get_project_metadata(&self, project: impl Into<ProjectRef>) -> Result<JsonObject, ArchitectError> {
        let argument = match project.into() {
            ProjectRef::Name(name) => Value::String(name),
            ProjectRef::Target(target) => serde_json::to_value(&target)?,
        };
        let value = meta_jobs::run(&self.scheduler, meta_jobs::GET_PROJECT_METADATA, argument).await?;
        Ok(as_object(&value))
    }

    /// Name of the builder configured for a target.
    pub async fn get_builder_name_for_target(&self, target: &Target) -> Result<String, ArchitectError> {
        let value = meta_jobs::run(
            &self.scheduler,
            meta_jobs::GET_BUILDER_NAME_FOR_TARGET,
            serde_json::to_value(target)?,
        )
        .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Validate options against a builder's schema, returning them with
    /// defaults applied.
    pub async fn validate_options(&self, options: JsonObject, builder_name: &str) -> Result<JsonObject, ArchitectError> {
        let argument = Value::Array(vec![Value::String(builder_name.to_string()), Value::Object(options)]);
        let value = meta_jobs::run(&self.scheduler, meta_jobs::VALIDATE_OPTIONS, argument).await?;
        Ok(as_object(&value))
    }

    /// Targets of this run and its ancestors, outermost first.
    fn chain(&self) -> Vec<String> {
        let mut chain = self.parents.clone();
        if let Some(target) = &self.target {
            chain.push(target_string_from_target(target));
        }
        chain
    }

    fn child_options(&self, options: ScheduleOptions, parents: Vec<String>) -> ScheduleByNameOptions {
        ScheduleByNameOptions {
            scheduler: self.scheduler.clone(),
            workspace_root: self.workspace_root.clone(),
            current_directory: self.current_directory.clone(),
            logger: Some(options.logger.unwrap_or_else(|| self.logger.create_child(""))),
            target: None,
            parents,
        }
    }

    /// Forward a child's progress into this run and stop it with this job.
    fn adopt(&self, run: &BuilderRun) {
        let progress = self.progress.clone();
        let forwarding = run.progress_observable().subscribe_fn(move |notification| {
            if let Notification::Next(report) = notification {
                progress.send(report.clone());
            }
        });
        let child = run.clone();
        self.scope.add_teardown(move || async move {
            forwarding.unsubscribe();
            child.stop().await;
        });
    }
}
