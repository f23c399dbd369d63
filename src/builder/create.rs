//! Turning builder functions into job handlers.
//!
//! [`create_builder`] wraps `fn(options, context) -> BuilderOutputLike` as a
//! [`JobHandler`]. The handler waits for a [`BuilderInput`] on its inbound
//! bus, runs the function with a fresh [`BuilderContext`], normalizes whatever
//! shape the function returned into a stream of [`BuilderOutput`]s and drives
//! the progress state machine around each output. The job completes once the
//! first run's output stream completes.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde_json::{json, Value};

use crate::builder::context::BuilderContext;
use crate::builder::progress::ProgressReporter;
use crate::core::builder_types::{BuilderInput, BuilderOutput};
use crate::core::options::JsonObject;
use crate::jobs::error::JobError;
use crate::jobs::handler::{JobChannel, JobHandler, JobHandlerContext, JobOutputStream, JobScope};
use crate::jobs::scheduler::Scheduler;
use crate::jobs::types::{JobDescription, JobInboundMessage};
use crate::util::logging::Logger;

/// What a builder function returns.
pub enum BuilderOutputLike {
    /// A single output, available immediately
    Value(BuilderOutput),
    /// A single output, available later
    Future(BoxFuture<'static, anyhow::Result<BuilderOutput>>),
    /// Any number of outputs over time (watch mode)
    Stream(BoxStream<'static, anyhow::Result<BuilderOutput>>),
}

impl BuilderOutputLike {
    /// Wrap a future.
    pub fn future<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<BuilderOutput>> + Send + 'static,
    {
        BuilderOutputLike::Future(future.boxed())
    }

    /// Wrap a stream.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = anyhow::Result<BuilderOutput>> + Send + 'static,
    {
        BuilderOutputLike::Stream(stream.boxed())
    }

    fn into_stream(self) -> BoxStream<'static, Result<BuilderOutput, JobError>> {
        match self {
            BuilderOutputLike::Value(output) => stream::once(future::ready(Ok(output))).boxed(),
            BuilderOutputLike::Future(future) => {
                stream::once(future.map(|r| r.map_err(JobError::from))).boxed()
            }
            BuilderOutputLike::Stream(outputs) => outputs.map(|r| r.map_err(JobError::from)).boxed(),
        }
    }
}

impl From<BuilderOutput> for BuilderOutputLike {
    fn from(output: BuilderOutput) -> Self {
        BuilderOutputLike::Value(output)
    }
}

type BuilderFn = dyn Fn(JsonObject, BuilderContext) -> anyhow::Result<BuilderOutputLike> + Send + Sync;

/// A loadable builder: the job handler produced by [`create_builder`].
#[derive(Clone)]
pub struct Builder {
    handler: Arc<dyn JobHandler>,
}

impl Builder {
    /// Use an arbitrary job handler as a builder. It receives [`BuilderInput`]
    /// messages and must emit [`BuilderOutput`] values.
    pub fn from_handler(handler: Arc<dyn JobHandler>) -> Self {
        Builder { handler }
    }

    pub fn handler(&self) -> &Arc<dyn JobHandler> {
        &self.handler
    }
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder").finish_non_exhaustive()
    }
}

/// Create a builder from a function.
///
/// The function receives the validated options and a [`BuilderContext`]. It
/// picks the output shape explicitly through [`BuilderOutputLike`]; an `Err`
/// returned directly fails the run like an errored stream would.
pub fn create_builder<F>(run: F) -> Builder
where
    F: Fn(JsonObject, BuilderContext) -> anyhow::Result<BuilderOutputLike> + Send + Sync + 'static,
{
    Builder {
        handler: Arc::new(BuilderHandler { run: Arc::new(run) }),
    }
}

struct BuilderHandler {
    run: Arc<BuilderFn>,
}

/// Per-job resources shared by every run of a builder job.
#[derive(Clone)]
struct RunEnvironment {
    scheduler: Scheduler,
    scope: JobScope,
    progress: JobChannel,
    log: JobChannel,
}

impl JobHandler for BuilderHandler {
    fn description(&self) -> JobDescription {
        JobDescription::new("")
            .with_channel("progress", json!(true))
            .with_channel("log", json!(true))
    }

    fn handle(&self, _argument: Value, context: JobHandlerContext) -> JobOutputStream {
        let JobHandlerContext {
            scheduler,
            inbound_bus,
            scope,
            ..
        } = context;

        let channels = scope
            .create_channel("progress")
            .and_then(|progress| Ok((progress, scope.create_channel("log")?)));
        let (progress, log) = match channels {
            Ok(channels) => channels,
            Err(error) => return stream::once(future::ready(Err(error))).boxed(),
        };
        let env = RunEnvironment {
            scheduler,
            scope,
            progress,
            log,
        };

        let run = self.run.clone();
        inbound_bus
            .filter_map(|message| {
                future::ready(match message {
                    JobInboundMessage::Input(value) => Some(value),
                    _ => None,
                })
            })
            .map(move |value| {
                let outputs = match serde_json::from_value::<BuilderInput>(value) {
                    Ok(input) => run_builder(run.clone(), input, env.clone()),
                    Err(e) => stream::once(future::ready(Err(JobError::InvalidMessage(format!(
                        "invalid builder input: {}",
                        e
                    )))))
                    .boxed(),
                };
                // `None` marks the end of a run.
                outputs.map(Some).chain(stream::once(future::ready(None))).boxed()
            })
            .flatten_unordered(None)
            .take_while(|item| future::ready(item.is_some()))
            .filter_map(future::ready)
            .boxed()
    }
}

/// Run the builder function for one input.
fn run_builder(run: Arc<BuilderFn>, input: BuilderInput, env: RunEnvironment) -> JobOutputStream {
    let reporter = Arc::new(ProgressReporter::new(
        env.progress.clone(),
        input.id,
        input.info.clone(),
        input.target.clone(),
    ));

    let logger = Logger::new(input.info.builder_name.clone());
    let log = env.log.clone();
    let forwarding = logger.subscribe_fn(move |entry| match serde_json::to_value(entry) {
        Ok(value) => log.send(value),
        Err(e) => tracing::warn!("dropping log entry: {}", e),
    });
    env.scope.add_teardown(move || async move { forwarding.unsubscribe() });

    let options = input.options.clone();
    let context = BuilderContext::new(input, logger, reporter.clone(), env.scheduler, env.scope, env.progress);

    reporter.report_running();
    let outputs = match run(options, context) {
        Ok(output) => output.into_stream(),
        Err(error) => stream::once(future::ready(Err(JobError::from(error)))).boxed(),
    };

    let produced = Arc::new(AtomicBool::new(false));
    let seen = produced.clone();
    let fallback = stream::once(async move {
        if produced.load(Ordering::SeqCst) {
            None
        } else {
            Some(Ok(BuilderOutput::failure()))
        }
    })
    .filter_map(future::ready);

    outputs
        .inspect(move |_| seen.store(true, Ordering::SeqCst))
        .chain(fallback)
        .then(move |item| {
            let reporter = reporter.clone();
            async move {
                match &item {
                    Ok(_) => reporter.report_output(),
                    Err(error) => reporter.report_error(error.to_string()),
                }
                // Let log entries queued before this output reach the log
                // channel first.
                tokio::task::yield_now().await;
                item.map(|output| output.to_value())
            }
        })
        .boxed()
}
