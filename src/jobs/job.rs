//! Handle to a scheduled job.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::jobs::error::JobError;
use crate::jobs::subject::{EventStream, Observable, Subject};
use crate::jobs::types::{
    JobDescription, JobId, JobInboundMessage, JobOutboundMessage, JobOutboundMessageKind, JobState,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
struct ChannelTable {
    subjects: HashMap<String, Subject<Value>>,
    closed: bool,
}

/// State shared between a [`Job`] handle and its runner task.
pub(crate) struct JobShared {
    pub(crate) id: JobId,
    pub(crate) name: String,
    state: watch::Sender<JobState>,
    description: watch::Sender<Option<Result<JobDescription, JobError>>>,
    pub(crate) output: Subject<Value>,
    pub(crate) outbound: Subject<JobOutboundMessage>,
    channels: Mutex<ChannelTable>,
    inbound: mpsc::UnboundedSender<JobInboundMessage>,
    stop: watch::Sender<bool>,
}

impl JobShared {
    pub(crate) fn new(
        name: &str,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<JobInboundMessage>) {
        let (inbound, inbound_rx) = mpsc::unbounded_channel();
        let shared = JobShared {
            id: JobId::next(),
            name: name.to_string(),
            state: watch::channel(JobState::Queued).0,
            description: watch::channel(None).0,
            output: Subject::replay_last(),
            outbound: Subject::new(),
            channels: Mutex::new(ChannelTable::default()),
            inbound,
            stop: watch::channel(false).0,
        };
        (Arc::new(shared), inbound_rx)
    }

    pub(crate) fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// Move to `state`. Transitions out of a terminal state are ignored.
    pub(crate) fn set_state(&self, state: JobState) {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == state {
                return false;
            }
            tracing::trace!("job {} `{}`: {} -> {}", self.id, self.name, current, state);
            *current = state;
            true
        });
    }

    pub(crate) fn set_description(&self, description: Result<JobDescription, JobError>) {
        self.description.send_replace(Some(description));
    }

    pub(crate) fn emit(&self, kind: JobOutboundMessageKind) {
        self.outbound.next(JobOutboundMessage::new(self.id, kind));
    }

    pub(crate) fn stop_requested(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    /// The subject backing channel `name`, created on first use.
    pub(crate) fn channel(&self, name: &str) -> Subject<Value> {
        let mut table = lock(&self.channels);
        let closed = table.closed;
        table
            .subjects
            .entry(name.to_string())
            .or_insert_with(|| {
                let subject = Subject::replay_last();
                if closed {
                    subject.complete();
                }
                subject
            })
            .clone()
    }

    /// Complete every channel. Channels requested afterwards start completed.
    pub(crate) fn close_channels(&self) {
        let subjects: Vec<Subject<Value>> = {
            let mut table = lock(&self.channels);
            table.closed = true;
            table.subjects.values().cloned().collect()
        };
        for subject in subjects {
            subject.complete();
        }
    }
}

/// A scheduled job. Cheap to clone; all clones observe the same job.
#[derive(Clone)]
pub struct Job {
    pub(crate) shared: Arc<JobShared>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

impl Job {
    pub fn id(&self) -> JobId {
        self.shared.id
    }

    /// Name the job was scheduled under.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current state.
    pub fn state(&self) -> JobState {
        self.shared.state()
    }

    /// Watch state transitions.
    pub fn state_changes(&self) -> watch::Receiver<JobState> {
        self.shared.state.subscribe()
    }

    /// The job description, once the handler is resolved.
    ///
    /// Fails if the name could not be resolved or the argument was invalid.
    pub async fn description(&self) -> Result<JobDescription, JobError> {
        let mut rx = self.shared.description.subscribe();
        let value = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| JobError::message("job runner went away"))?;
        match value.as_ref() {
            Some(description) => description.clone(),
            None => Err(JobError::message("job description missing")),
        }
    }

    /// Send an input value to the handler.
    pub fn input(&self, value: Value) {
        self.send(JobInboundMessage::Input(value));
    }

    /// Send a raw inbound message.
    pub fn send(&self, message: JobInboundMessage) {
        if self.shared.inbound.send(message).is_err() {
            tracing::debug!("job {} already finished; inbound message dropped", self.shared.id);
        }
    }

    /// Output values. Replays the most recent output to late subscribers.
    pub fn output(&self) -> EventStream<Value> {
        self.shared.output.subscribe()
    }

    /// Output as an observable, for callback subscriptions.
    pub fn output_observable(&self) -> Observable<Value> {
        self.shared.output.as_observable()
    }

    /// Outbound messages emitted from now on.
    pub fn outbound_bus(&self) -> EventStream<JobOutboundMessage> {
        self.shared.outbound.subscribe()
    }

    /// Messages of channel `name`. Replays the most recent message.
    ///
    /// Subscribing before the job creates the channel is fine.
    pub fn get_channel(&self, name: &str) -> EventStream<Value> {
        self.shared.channel(name).subscribe()
    }

    /// Channel `name` as an observable.
    pub fn channel(&self, name: &str) -> Observable<Value> {
        self.shared.channel(name).as_observable()
    }

    /// Check the job is alive. Resolves when the matching pong arrives.
    pub async fn ping(&self) -> Result<(), JobError> {
        static NEXT_PING: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let id = NEXT_PING.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let mut bus = self.outbound_bus();
        self.send(JobInboundMessage::Ping { id });
        while let Some(message) = bus.next().await {
            if let JobOutboundMessageKind::Pong { id: pong } = message?.kind {
                if pong == id {
                    return Ok(());
                }
            }
        }
        Err(JobError::message(format!("job {} ended before answering ping", self.id())))
    }

    /// Stop the job and wait for its teardowns. Calling it again is harmless.
    pub async fn stop(&self) {
        self.shared.stop.send_replace(true);
        self.wait().await;
    }

    /// Wait for the job to end, returning its final state.
    pub async fn wait(&self) -> JobState {
        let mut rx = self.shared.state.subscribe();
        let state = match rx.wait_for(|s| s.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }

    /// The most recent output, if any.
    pub fn last_output(&self) -> Option<Value> {
        self.shared.output.last()
    }
}
