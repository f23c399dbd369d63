//! Job errors.

use std::sync::Arc;

use thiserror::Error;

use crate::schema::{SchemaCompileError, SchemaValidationErrors};

/// Errors surfaced by the scheduler, registries and job handlers.
///
/// `JobError` is `Clone` so a single failure can be fanned out to every
/// subscriber of a job's output and channels.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    #[error("Job name {0:?} does not exist.")]
    JobDoesNotExist(String),

    #[error("Job named {0:?} already exists.")]
    JobNameAlreadyRegistered(String),

    #[error("Channel {0:?} already exist.")]
    ChannelAlreadyExists(String),

    #[error(transparent)]
    SchemaValidation(#[from] SchemaValidationErrors),

    #[error(transparent)]
    SchemaCompile(#[from] SchemaCompileError),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("{0}")]
    Failed(Arc<anyhow::Error>),
}

impl JobError {
    /// A failure carrying a plain message.
    pub fn message(message: impl Into<String>) -> Self {
        JobError::Failed(Arc::new(anyhow::anyhow!(message.into())))
    }

    /// Wrap an arbitrary error.
    pub fn failed(error: anyhow::Error) -> Self {
        JobError::from(error)
    }

    /// Whether this is a schema validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, JobError::SchemaValidation(_))
    }
}

impl From<anyhow::Error> for JobError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<JobError>() {
            Ok(job_error) => job_error,
            Err(error) => match error.downcast::<SchemaValidationErrors>() {
                Ok(validation) => JobError::SchemaValidation(validation),
                Err(error) => JobError::Failed(Arc::new(error)),
            },
        }
    }
}
