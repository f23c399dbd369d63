//! Structured loggers for builders.
//!
//! A [`Logger`] is a subscribable sink of [`LogEntry`] values. Child loggers
//! forward every entry to their parent, so subscribing to a root logger sees
//! the entries of every builder run it was handed to. Entries logged through
//! [`Logger::log`] are also mirrored as `tracing` events.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::jobs::subject::{EventStream, Notification, Subject, Subscription};

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// One log message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,

    /// Name of the logger that produced the entry
    pub name: String,

    /// Names of the logger's ancestors, root first
    #[serde(default)]
    pub path: Vec<String>,

    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

struct LoggerInner {
    name: String,
    path: Vec<String>,
    entries: Subject<LogEntry>,
    parent: Option<Logger>,
}

/// A named log sink. Cheap to clone.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.inner.name)
            .field("path", &self.inner.path)
            .finish()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Logger {
    /// Create a root logger.
    pub fn new(name: impl Into<String>) -> Self {
        Logger {
            inner: Arc::new(LoggerInner {
                name: name.into(),
                path: Vec::new(),
                entries: Subject::new(),
                parent: None,
            }),
        }
    }

    /// Create a logger whose entries are also delivered to `self`.
    pub fn create_child(&self, name: impl Into<String>) -> Logger {
        let mut path = self.inner.path.clone();
        path.push(self.inner.name.clone());
        Logger {
            inner: Arc::new(LoggerInner {
                name: name.into(),
                path,
                entries: Subject::new(),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Log a message.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry {
            level,
            message: message.into(),
            name: self.inner.name.clone(),
            path: self.inner.path.clone(),
            timestamp: now_millis(),
        };
        match level {
            LogLevel::Debug => tracing::debug!(logger = %entry.name, "{}", entry.message),
            LogLevel::Info => tracing::info!(logger = %entry.name, "{}", entry.message),
            LogLevel::Warn => tracing::warn!(logger = %entry.name, "{}", entry.message),
            LogLevel::Error | LogLevel::Fatal => {
                tracing::error!(logger = %entry.name, "{}", entry.message)
            }
        }
        self.log_entry(entry);
    }

    /// Deliver an already built entry to subscribers of this logger and its ancestors.
    pub fn log_entry(&self, entry: LogEntry) {
        let mut logger = Some(self);
        while let Some(current) = logger {
            current.inner.entries.next(entry.clone());
            logger = current.inner.parent.as_ref();
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn fatal(&self, message: impl Into<String>) {
        self.log(LogLevel::Fatal, message);
    }

    /// Entries logged from now on, as a stream.
    pub fn subscribe(&self) -> EventStream<LogEntry> {
        self.inner.entries.subscribe()
    }

    /// Receive entries synchronously, on the task that logs them.
    pub fn subscribe_fn<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&LogEntry) + Send + Sync + 'static,
    {
        self.inner.entries.subscribe_fn(move |notification| {
            if let Notification::Next(entry) = notification {
                callback(entry);
            }
        })
    }
}
