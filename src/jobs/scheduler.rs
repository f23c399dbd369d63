//! The scheduler: turns a job name and argument into a running [`Job`].
//!
//! Every scheduled job gets its own runner task. The runner waits until the
//! scheduler is unpaused and the job's dependencies ended, resolves the
//! handler, validates the argument, then pumps the handler's output stream
//! alongside inbound messages and channel events until the stream ends, fails
//! or the job is stopped. Teardowns run exactly once on the way out.

use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use futures::channel::mpsc as stream_channel;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::jobs::error::JobError;
use crate::jobs::handler::{JobHandler, JobHandlerContext, JobScope};
use crate::jobs::job::{Job, JobShared};
use crate::jobs::registry::Registry;
use crate::jobs::types::{
    JobDescription, JobInboundMessage, JobOutboundMessage, JobOutboundMessageKind, JobState,
};
use crate::schema::SchemaRegistry;

/// Extra options for [`Scheduler::schedule_with`].
#[derive(Debug, Clone, Default)]
pub struct ScheduleJobOptions {
    /// Jobs that must end before this one starts
    pub dependencies: Vec<Job>,
}

struct SchedulerInner {
    registry: Arc<dyn Registry>,
    schema_registry: Arc<dyn SchemaRegistry>,
    paused: watch::Sender<usize>,
}

/// Schedules jobs from a registry. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

/// Keeps the scheduler paused until dropped.
#[must_use = "the scheduler resumes as soon as the guard is dropped"]
pub struct PauseGuard {
    inner: Arc<SchedulerInner>,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.inner.paused.send_modify(|count| *count = count.saturating_sub(1));
    }
}

impl Scheduler {
    pub fn new(registry: Arc<dyn Registry>, schema_registry: Arc<dyn SchemaRegistry>) -> Self {
        Scheduler {
            inner: Arc::new(SchedulerInner {
                registry,
                schema_registry,
                paused: watch::channel(0).0,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.inner.registry
    }

    pub fn schema_registry(&self) -> &Arc<dyn SchemaRegistry> {
        &self.inner.schema_registry
    }

    /// Describe the job registered under `name` without running it.
    pub async fn get_description(&self, name: &str) -> Result<Option<JobDescription>, JobError> {
        let handler = self.inner.registry.get(name).await?;
        Ok(handler.map(|h| {
            let mut description = h.description();
            description.name = name.to_string();
            description
        }))
    }

    /// Whether `name` resolves to a handler.
    pub async fn has(&self, name: &str) -> Result<bool, JobError> {
        Ok(self.inner.registry.get(name).await?.is_some())
    }

    /// Pause the scheduler. Jobs scheduled while any guard is alive stay
    /// queued until the last guard is dropped.
    pub fn pause(&self) -> PauseGuard {
        self.inner.paused.send_modify(|count| *count += 1);
        PauseGuard {
            inner: self.inner.clone(),
        }
    }

    /// Schedule a job. Must be called from within a tokio runtime.
    pub fn schedule(&self, name: &str, argument: Value) -> Job {
        self.schedule_with(name, argument, ScheduleJobOptions::default())
    }

    /// Schedule a job with extra options.
    pub fn schedule_with(&self, name: &str, argument: Value, options: ScheduleJobOptions) -> Job {
        let (shared, inbound) = JobShared::new(name);
        tracing::debug!("scheduling job {} `{}`", shared.id, name);

        let runner = Runner {
            scheduler: self.clone(),
            shared: shared.clone(),
        };
        tokio::spawn(runner.run(argument, options.dependencies, inbound));

        Job { shared }
    }

    async fn wait_unpaused(&self) {
        let mut rx = self.inner.paused.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|s| *s).await;
}

struct Runner {
    scheduler: Scheduler,
    shared: Arc<JobShared>,
}

enum Exit {
    Completed,
    Stopped,
    Failed(JobError),
}

impl Runner {
    async fn run(
        self,
        argument: Value,
        dependencies: Vec<Job>,
        mut inbound: mpsc::UnboundedReceiver<JobInboundMessage>,
    ) {
        let mut stop = self.shared.stop_requested();

        let ready = async {
            self.scheduler.wait_unpaused().await;
            for dependency in &dependencies {
                dependency.wait().await;
            }
        };
        tokio::select! {
            _ = ready => {}
            _ = stopped(&mut stop) => {
                self.finish_early(JobState::Ended, JobError::message(format!(
                    "Job {:?} was stopped before it started.",
                    self.shared.name
                )));
                return;
            }
        }

        let (handler, description, argument) = match self.prepare(argument).await {
            Ok(prepared) => prepared,
            Err(error) => {
                tracing::debug!("job {} `{}` failed to start: {}", self.shared.id, self.shared.name, error);
                self.finish_early(JobState::Errored, error);
                return;
            }
        };

        self.shared.set_state(JobState::Started);
        self.shared.emit(JobOutboundMessageKind::Start);

        let (events_tx, mut events) = mpsc::unbounded_channel();
        let (handler_inbound, handler_inbound_rx) = stream_channel::unbounded();
        let scope = JobScope::new(self.shared.id, events_tx);
        let context = JobHandlerContext {
            description,
            scheduler: self.scheduler.clone(),
            inbound_bus: handler_inbound_rx.boxed(),
            scope: scope.clone(),
        };
        let mut outputs: BoxStream<'static, Result<Value, JobError>> = handler.handle(argument, context);

        let exit = loop {
            tokio::select! {
                biased;
                _ = stopped(&mut stop) => break Exit::Stopped,
                Some(message) = inbound.recv() => match message {
                    JobInboundMessage::Ping { id } => {
                        self.shared.emit(JobOutboundMessageKind::Pong { id });
                    }
                    JobInboundMessage::Stop => break Exit::Stopped,
                    JobInboundMessage::Input(value) => {
                        self.shared.set_state(JobState::Running);
                        let _ = handler_inbound.unbounded_send(JobInboundMessage::Input(value));
                    }
                },
                Some(event) = events.recv() => self.dispatch(event),
                item = outputs.next() => {
                    self.drain(&mut events);
                    match item {
                        Some(Ok(value)) => {
                            self.shared.output.next(value.clone());
                            self.shared.emit(JobOutboundMessageKind::Output(value));
                            self.shared.set_state(JobState::Waiting);
                        }
                        Some(Err(error)) => break Exit::Failed(error),
                        None => break Exit::Completed,
                    }
                }
            }
        };

        drop(outputs);
        drop(handler_inbound);
        scope.run_teardowns().await;
        self.drain(&mut events);
        drop(scope);

        match exit {
            Exit::Completed | Exit::Stopped => {
                if matches!(exit, Exit::Stopped) {
                    tracing::debug!("job {} `{}` stopped", self.shared.id, self.shared.name);
                }
                self.shared.output.complete();
                self.shared.close_channels();
                self.shared.set_state(JobState::Ended);
            }
            Exit::Failed(error) => {
                tracing::debug!("job {} `{}` failed: {}", self.shared.id, self.shared.name, error);
                self.shared.output.error(error);
                self.shared.close_channels();
                self.shared.set_state(JobState::Errored);
            }
        }
        self.shared.emit(JobOutboundMessageKind::End);
        self.shared.outbound.complete();
    }

    /// Resolve the handler, publish the description and validate the argument.
    async fn prepare(
        &self,
        argument: Value,
    ) -> Result<(Arc<dyn JobHandler>, JobDescription, Value), JobError> {
        let name = &self.shared.name;
        let handler = self
            .scheduler
            .inner
            .registry
            .get(name)
            .await?
            .ok_or_else(|| JobError::JobDoesNotExist(name.clone()))?;

        let mut description = handler.description();
        description.name = name.clone();

        let argument = if description.argument == Value::Bool(true) {
            argument
        } else {
            let validator = self
                .scheduler
                .inner
                .schema_registry
                .compile(&description.argument)
                .await?;
            validator.validate(argument).into_result()?
        };

        self.shared.set_description(Ok(description.clone()));
        self.shared.emit(JobOutboundMessageKind::OnReady);
        Ok((handler, description, argument))
    }

    fn finish_early(&self, state: JobState, error: JobError) {
        self.shared.set_description(Err(error.clone()));
        match state {
            JobState::Errored => self.shared.output.error(error),
            _ => self.shared.output.complete(),
        }
        self.shared.close_channels();
        self.shared.set_state(state);
        self.shared.emit(JobOutboundMessageKind::End);
        self.shared.outbound.complete();
    }

    fn drain(&self, events: &mut mpsc::UnboundedReceiver<JobOutboundMessage>) {
        while let Ok(event) = events.try_recv() {
            self.dispatch(event);
        }
    }

    /// Route a channel event from the handler to its subject and the outbound bus.
    fn dispatch(&self, event: JobOutboundMessage) {
        match &event.kind {
            JobOutboundMessageKind::ChannelCreate { name } => {
                let _ = self.shared.channel(name);
            }
            JobOutboundMessageKind::ChannelMessage { name, message } => {
                self.shared.channel(name).next(message.clone());
            }
            JobOutboundMessageKind::ChannelError { name, error } => {
                tracing::warn!("job {} channel `{}` errored: {}", self.shared.id, name, error);
                self.shared.channel(name).error(error.clone());
            }
            JobOutboundMessageKind::ChannelComplete { name } => {
                self.shared.channel(name).complete();
            }
            _ => {}
        }
        self.shared.outbound.next(event);
    }
}
