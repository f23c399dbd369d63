//! Scheduling builder runs and observing them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future;
use futures::stream::StreamExt;
use serde_json::Value;

use crate::architect::error::ArchitectError;
use crate::core::builder_types::{BuilderInfo, BuilderInput, BuilderOutput, BuilderProgressReport};
use crate::core::job_name::target_job_name;
use crate::core::options::JsonObject;
use crate::core::target::Target;
use crate::jobs::error::JobError;
use crate::jobs::job::Job;
use crate::jobs::scheduler::Scheduler;
use crate::jobs::subject::{EventStream, Notification, Observable, Subject, Subscription};
use crate::util::logging::{LogEntry, Logger};

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

/// Caller options for scheduling a builder or target.
#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    /// Receives the run's log entries, through a child logger
    pub logger: Option<Logger>,
}

impl ScheduleOptions {
    pub fn with_logger(logger: Logger) -> Self {
        ScheduleOptions { logger: Some(logger) }
    }
}

/// Everything [`schedule_by_name`] needs.
#[derive(Clone)]
pub struct ScheduleByNameOptions {
    pub scheduler: Scheduler,
    pub workspace_root: String,
    pub current_directory: String,
    pub logger: Option<Logger>,

    /// Target being run, stamped on every output
    pub target: Option<Target>,

    /// Targets of the runs that scheduled this one, outermost first
    pub parents: Vec<String>,
}

struct RunInner {
    id: u64,
    info: BuilderInfo,
    job: Job,
    output: Subject<BuilderOutput>,
    _subscriptions: Mutex<Vec<Subscription>>,
}

/// Handle to a scheduled builder run. Cheap to clone.
#[derive(Clone)]
pub struct BuilderRun {
    inner: Arc<RunInner>,
}

impl std::fmt::Debug for BuilderRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuilderRun")
            .field("id", &self.inner.id)
            .field("builder", &self.inner.info.builder_name)
            .field("job", &self.inner.job)
            .finish()
    }
}

impl BuilderRun {
    /// Run identifier, unique per process.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn info(&self) -> &BuilderInfo {
        &self.inner.info
    }

    /// The underlying job.
    pub fn job(&self) -> &Job {
        &self.inner.job
    }

    /// The first output of the run.
    pub async fn result(&self) -> Result<BuilderOutput, ArchitectError> {
        match self.inner.output.subscribe().next().await {
            Some(Ok(output)) => Ok(output),
            Some(Err(error)) => Err(error.into()),
            None => Err(ArchitectError::NoOutput(self.inner.job.name().to_string())),
        }
    }

    /// Every output of the run, from the first one.
    ///
    /// Outputs are buffered for as long as the `BuilderRun` is alive, so a
    /// long-lived watch run holds every rebuild it has produced. Drop the run
    /// once its outputs are no longer needed.
    pub fn output(&self) -> EventStream<BuilderOutput> {
        self.inner.output.subscribe()
    }

    /// Progress reports of the run and of the runs it scheduled. Replays the
    /// most recent report.
    pub fn progress(&self) -> EventStream<BuilderProgressReport> {
        self.inner
            .job
            .get_channel("progress")
            .filter_map(|report| {
                future::ready(match report {
                    Ok(value) => serde_json::from_value(value).ok().map(Ok),
                    Err(error) => Some(Err(error)),
                })
            })
            .boxed()
    }

    pub(crate) fn progress_observable(&self) -> Observable<Value> {
        self.inner.job.channel("progress")
    }

    /// Stop the run and wait for its teardowns.
    pub async fn stop(&self) {
        self.inner.job.stop().await;
    }
}

/// Schedule a job by name and send it a [`BuilderInput`].
///
/// Fails if the name cannot be resolved or does not name a builder job.
pub async fn schedule_by_name(
    name: &str,
    build_options: JsonObject,
    options: ScheduleByNameOptions,
) -> Result<BuilderRun, ArchitectError> {
    let job = options.scheduler.schedule(name, Value::Object(JsonObject::new()));
    let description = job.description().await?;

    let info = match description
        .info
        .and_then(|info| serde_json::from_value::<BuilderInfo>(info).ok())
    {
        Some(info) => info,
        None => {
            job.stop().await;
            return Err(ArchitectError::NotABuilder(name.to_string()));
        }
    };
    let id = NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed);

    let mut subscriptions = Vec::new();
    if let Some(logger) = &options.logger {
        let child_name = match &options.target {
            Some(target) => target_job_name(target),
            None => name.to_string(),
        };
        let logger = logger.create_child(child_name);
        subscriptions.push(job.channel("log").subscribe_fn(move |notification| {
            if let Notification::Next(value) = notification {
                match serde_json::from_value::<LogEntry>(value.clone()) {
                    Ok(entry) => logger.log_entry(entry),
                    Err(e) => tracing::warn!("malformed log entry: {}", e),
                }
            }
        }));
    }

    let output = Subject::replay_all();
    let sink = output.clone();
    let target = options.target.clone();
    let stamp = info.clone();
    subscriptions.push(job.output_observable().subscribe_fn(move |notification| match notification {
        Notification::Next(value) => match serde_json::from_value::<BuilderOutput>(value.clone()) {
            Ok(mut output) => {
                if target.is_some() {
                    output.target = target.clone();
                }
                output.info = Some(stamp.clone());
                sink.next(output);
            }
            Err(e) => sink.error(JobError::InvalidMessage(format!("invalid builder output: {}", e))),
        },
        Notification::Error(error) => sink.error(error),
        Notification::Complete => sink.complete(),
    }));

    let input = BuilderInput {
        id,
        current_directory: options.current_directory,
        workspace_root: options.workspace_root,
        info: info.clone(),
        options: build_options,
        target: options.target,
        parents: options.parents,
    };
    job.input(serde_json::to_value(&input)?);

    Ok(BuilderRun {
        inner: Arc::new(RunInner {
            id,
            info,
            job,
            output,
            _subscriptions: Mutex::new(subscriptions),
        }),
    })
}

/// Schedule a workspace target. Options are the target's workspace options
/// merged with `overrides`.
pub async fn schedule_by_target(
    target: &Target,
    overrides: JsonObject,
    mut options: ScheduleByNameOptions,
) -> Result<BuilderRun, ArchitectError> {
    options.target = Some(target.clone());
    schedule_by_name(&target_job_name(target), overrides, options).await
}
