//! Errors surfaced by the Architect facade and builder contexts.

use std::sync::Arc;

use thiserror::Error;

use crate::core::target::TargetError;
use crate::jobs::error::JobError;

#[derive(Debug, Clone, Error)]
pub enum ArchitectError {
    #[error("Invalid builder name: {0:?}")]
    InvalidBuilderName(String),

    #[error(transparent)]
    Target(#[from] TargetError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Scheduling target {target:?} would wait on itself: {chain}")]
    ScheduleCycle { target: String, chain: String },

    #[error("Job {0:?} completed without producing an output.")]
    NoOutput(String),

    #[error("Job {0:?} is not a builder job.")]
    NotABuilder(String),

    #[error("{0}")]
    Host(Arc<anyhow::Error>),

    #[error("{0}")]
    Json(Arc<serde_json::Error>),
}

impl ArchitectError {
    /// Wrap an error raised by an [`ArchitectHost`](crate::architect::ArchitectHost).
    pub fn host(error: anyhow::Error) -> Self {
        ArchitectError::Host(Arc::new(error))
    }

    /// Whether this is a schema validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, ArchitectError::Job(job) if job.is_validation())
    }
}

impl From<serde_json::Error> for ArchitectError {
    fn from(error: serde_json::Error) -> Self {
        ArchitectError::Json(Arc::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_errors_keep_their_message() {
        let err = ArchitectError::host(anyhow::anyhow!("host exploded"));
        assert_eq!(err.to_string(), "host exploded");
    }

    #[test]
    fn test_job_errors_are_transparent() {
        let err = ArchitectError::from(JobError::JobDoesNotExist("{a:b}".into()));
        assert_eq!(err.to_string(), "Job name \"{a:b}\" does not exist.");
    }
}
