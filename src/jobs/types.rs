//! Job identity, state and the messages exchanged with a running job.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::jobs::error::JobError;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a scheduled job.
///
/// Ids come from a single process-wide counter and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    /// Allocate the next id.
    pub fn next() -> Self {
        JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job.
///
/// `Queued -> Started -> (Running <-> Waiting)* -> Ended | Errored`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Scheduled, waiting to be resolved and started
    Queued,
    /// Handler invoked, no input received yet
    Started,
    /// Processing an input
    Running,
    /// An output was emitted; waiting for more input or completion
    Waiting,
    /// Completed normally or stopped
    Ended,
    /// Failed
    Errored,
}

impl JobState {
    /// Whether the job has finished.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Ended | JobState::Errored)
    }

    /// Whether the job left the queue.
    pub fn has_started(self) -> bool {
        self != JobState::Queued
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Started => "started",
            JobState::Running => "running",
            JobState::Waiting => "waiting",
            JobState::Ended => "ended",
            JobState::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Metadata of a job handler, published once the job is resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescription {
    /// Name the job was scheduled under
    pub name: String,

    /// Schema of the argument
    #[serde(default = "accept_all")]
    pub argument: Value,

    /// Schema of input messages
    #[serde(default = "accept_all")]
    pub input: Value,

    /// Schema of output values
    #[serde(default = "accept_all")]
    pub output: Value,

    /// Channel names and their message schemas
    #[serde(default)]
    pub channels: BTreeMap<String, Value>,

    /// Handler-specific metadata (builder info for builder jobs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
}

fn accept_all() -> Value {
    Value::Bool(true)
}

impl JobDescription {
    /// A description accepting any argument, input and output.
    pub fn new(name: impl Into<String>) -> Self {
        JobDescription {
            name: name.into(),
            argument: accept_all(),
            input: accept_all(),
            output: accept_all(),
            channels: BTreeMap::new(),
            info: None,
        }
    }

    pub fn with_argument(mut self, schema: Value) -> Self {
        self.argument = schema;
        self
    }

    pub fn with_input(mut self, schema: Value) -> Self {
        self.input = schema;
        self
    }

    pub fn with_output(mut self, schema: Value) -> Self {
        self.output = schema;
        self
    }

    /// Declare a channel.
    pub fn with_channel(mut self, name: impl Into<String>, schema: Value) -> Self {
        self.channels.insert(name.into(), schema);
        self
    }

    pub fn with_info(mut self, info: Value) -> Self {
        self.info = Some(info);
        self
    }
}

/// Messages sent to a running job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobInboundMessage {
    /// Liveness check, answered with a `Pong` carrying the same id
    Ping { id: u64 },
    /// Request early termination
    Stop,
    /// Input value for the handler
    Input(Value),
}

/// A message published by a job on its outbound bus.
#[derive(Debug, Clone)]
pub struct JobOutboundMessage {
    pub job_id: JobId,
    pub kind: JobOutboundMessageKind,
}

/// Kinds of outbound messages.
#[derive(Debug, Clone)]
pub enum JobOutboundMessageKind {
    /// The handler was resolved and the description published
    OnReady,
    /// The handler was invoked
    Start,
    /// The job finished
    End,
    Pong { id: u64 },
    Output(Value),
    ChannelCreate { name: String },
    ChannelMessage { name: String, message: Value },
    ChannelError { name: String, error: JobError },
    ChannelComplete { name: String },
}

impl JobOutboundMessage {
    pub fn new(job_id: JobId, kind: JobOutboundMessageKind) -> Self {
        JobOutboundMessage { job_id, kind }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_ids_increase() {
        let a = JobId::next();
        let b = JobId::next();
        assert!(b > a);
        assert_ne!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_state_predicates() {
        assert!(!JobState::Queued.has_started());
        assert!(JobState::Waiting.has_started());
        assert!(JobState::Errored.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }

    #[test]
    fn test_description_defaults() {
        let description: JobDescription = serde_json::from_value(json!({"name": "x"})).unwrap();
        assert_eq!(description, JobDescription::new("x"));
        assert_eq!(description.argument, json!(true));
    }
}
