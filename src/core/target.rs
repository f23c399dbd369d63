//! Target addresses - what gets run.
//!
//! A Target names one configured unit of work in a workspace: a project,
//! one of its targets, and optionally a configuration (or a comma-separated
//! list of configurations).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error produced when parsing a target string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("Invalid target string: {0:?}.")]
    InvalidTargetString(String),
}

/// A `(project, target, configuration?)` address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Project name
    pub project: String,

    /// Target name within the project
    pub target: String,

    /// Configuration name(s). `Some("")` is distinct from `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
}

impl Target {
    /// Create a target without a configuration.
    pub fn new(project: impl Into<String>, target: impl Into<String>) -> Self {
        Target {
            project: project.into(),
            target: target.into(),
            configuration: None,
        }
    }

    /// Set the configuration.
    pub fn with_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = Some(configuration.into());
        self
    }

    /// Configuration names in application order.
    ///
    /// `"production,es5"` yields `["production", "es5"]`. Empty segments are skipped.
    pub fn configurations(&self) -> Vec<&str> {
        self.configuration
            .as_deref()
            .map(|c| {
                c.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&target_string_from_target(self))
    }
}

impl FromStr for Target {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        target_from_target_string(s)
    }
}

/// Serialize a target to `project:target[:configuration]`.
pub fn target_string_from_target(target: &Target) -> String {
    match &target.configuration {
        Some(configuration) => format!("{}:{}:{}", target.project, target.target, configuration),
        None => format!("{}:{}", target.project, target.target),
    }
}

/// Parse `project:target[:configuration]`.
///
/// At most three segments are considered; anything after the third is ignored.
/// Fewer than two segments is an error. An empty third segment still yields
/// `configuration: Some("")`.
pub fn target_from_target_string(s: &str) -> Result<Target, TargetError> {
    let mut parts = s.splitn(4, ':');
    let project = parts.next();
    let target = parts.next();
    let configuration = parts.next();

    match (project, target) {
        (Some(project), Some(target)) => Ok(Target {
            project: project.to_string(),
            target: target.to_string(),
            configuration: configuration.map(str::to_string),
        }),
        _ => Err(TargetError::InvalidTargetString(s.to_string())),
    }
}
