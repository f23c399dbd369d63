//! Job handlers and the context they run with.
//!
//! A [`JobHandler`] is invoked once per scheduled job with the job argument and
//! a [`JobHandlerContext`]. It returns a stream of output values; everything
//! else (channel messages, teardown registration) goes through the
//! [`JobScope`] in the context.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::jobs::error::JobError;
use crate::jobs::scheduler::Scheduler;
use crate::jobs::types::{JobDescription, JobId, JobInboundMessage, JobOutboundMessage, JobOutboundMessageKind};

/// Stream of output values produced by a handler.
pub type JobOutputStream = BoxStream<'static, Result<Value, JobError>>;

/// Something the scheduler can run.
pub trait JobHandler: Send + Sync {
    /// Schemas and metadata of the job.
    fn description(&self) -> JobDescription;

    /// Start the job. The returned stream is dropped when the job is stopped.
    fn handle(&self, argument: Value, context: JobHandlerContext) -> JobOutputStream;
}

/// Everything a handler gets besides its argument.
pub struct JobHandlerContext {
    /// Description the job was started with
    pub description: JobDescription,

    /// Scheduler for nested jobs
    pub scheduler: Scheduler,

    /// Messages sent to the job after it started
    pub inbound_bus: BoxStream<'static, JobInboundMessage>,

    /// Channels and teardowns of the running job
    pub scope: JobScope,
}

impl JobHandlerContext {
    pub fn job_id(&self) -> JobId {
        self.scope.job_id()
    }

    /// See [`JobScope::create_channel`].
    pub fn create_channel(&self, name: &str) -> Result<JobChannel, JobError> {
        self.scope.create_channel(name)
    }

    /// See [`JobScope::add_teardown`].
    pub fn add_teardown<F, Fut>(&self, teardown: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.scope.add_teardown(teardown)
    }
}

type Teardown = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Channels and teardown registry of one running job. Cheap to clone.
#[derive(Clone)]
pub struct JobScope {
    job_id: JobId,
    events: mpsc::UnboundedSender<JobOutboundMessage>,
    channels: Arc<Mutex<HashSet<String>>>,
    /// `None` once the teardowns ran.
    teardowns: Arc<Mutex<Option<Vec<Teardown>>>>,
}

impl JobScope {
    pub(crate) fn new(job_id: JobId, events: mpsc::UnboundedSender<JobOutboundMessage>) -> Self {
        JobScope {
            job_id,
            events,
            channels: Arc::new(Mutex::new(HashSet::new())),
            teardowns: Arc::new(Mutex::new(Some(Vec::new()))),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Create a named channel. Each name can be created once per job.
    pub fn create_channel(&self, name: &str) -> Result<JobChannel, JobError> {
        if !lock(&self.channels).insert(name.to_string()) {
            return Err(JobError::ChannelAlreadyExists(name.to_string()));
        }
        let channel = JobChannel {
            job_id: self.job_id,
            name: name.to_string(),
            events: self.events.clone(),
        };
        channel.emit(JobOutboundMessageKind::ChannelCreate {
            name: name.to_string(),
        });
        Ok(channel)
    }

    /// Register a callback to run when the job ends or is stopped.
    ///
    /// Teardowns run once, in registration order. A teardown added after the
    /// job ended runs immediately on a new task.
    pub fn add_teardown<F, Fut>(&self, teardown: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: Teardown = Box::new(move || teardown().boxed());
        let mut teardowns = lock(&self.teardowns);
        match teardowns.as_mut() {
            Some(list) => list.push(boxed),
            None => {
                drop(teardowns);
                tokio::spawn(boxed());
            }
        }
    }

    /// Run every registered teardown. Later calls do nothing.
    pub(crate) async fn run_teardowns(&self) {
        let Some(teardowns) = lock(&self.teardowns).take() else {
            return;
        };
        for teardown in teardowns {
            teardown().await;
        }
    }
}

/// Sending half of a named job channel.
#[derive(Clone)]
pub struct JobChannel {
    job_id: JobId,
    name: String,
    events: mpsc::UnboundedSender<JobOutboundMessage>,
}

impl JobChannel {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publish a message on the channel.
    pub fn send(&self, message: Value) {
        self.emit(JobOutboundMessageKind::ChannelMessage {
            name: self.name.clone(),
            message,
        });
    }

    /// Terminate the channel with an error.
    pub fn error(&self, error: JobError) {
        self.emit(JobOutboundMessageKind::ChannelError {
            name: self.name.clone(),
            error,
        });
    }

    /// Complete the channel.
    pub fn complete(&self) {
        self.emit(JobOutboundMessageKind::ChannelComplete {
            name: self.name.clone(),
        });
    }

    fn emit(&self, kind: JobOutboundMessageKind) {
        // The job may already be over; late messages are dropped.
        let _ = self.events.send(JobOutboundMessage::new(self.job_id, kind));
    }
}

/// Merge two streams, ending as soon as `primary` ends.
pub fn merge_until_complete<T: Send + 'static>(
    primary: BoxStream<'static, T>,
    secondary: BoxStream<'static, T>,
) -> BoxStream<'static, T> {
    let primary = primary.map(Some).chain(stream::once(future::ready(None)));
    stream::select(primary, secondary.map(Some))
        .take_while(|item| future::ready(item.is_some()))
        .filter_map(future::ready)
        .boxed()
}

struct FnJobHandler<F> {
    description: JobDescription,
    run: F,
}

impl<F, Fut> JobHandler for FnJobHandler<F>
where
    F: Fn(Value, JobHandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    fn description(&self) -> JobDescription {
        self.description.clone()
    }

    fn handle(&self, argument: Value, context: JobHandlerContext) -> JobOutputStream {
        let result = (self.run)(argument, context);
        stream::once(async move { result.await.map_err(JobError::from) }).boxed()
    }
}

/// Create a handler from an async function producing a single output.
pub fn create_job_handler<F, Fut>(description: JobDescription, run: F) -> Arc<dyn JobHandler>
where
    F: Fn(Value, JobHandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnJobHandler { description, run })
}
