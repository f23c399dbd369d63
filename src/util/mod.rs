//! Shared utilities

pub mod logging;

pub use logging::{LogEntry, LogLevel, Logger};
