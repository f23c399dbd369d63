//! Builder wire types.
//!
//! These are the JSON shapes exchanged between the scheduler, the builder
//! wrapper and consumers of a run. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::options::JsonObject;
use crate::core::target::Target;

/// Immutable metadata for a resolved builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderInfo {
    /// Fully qualified builder name (`pkg:builder`)
    pub builder_name: String,

    /// Human readable description
    #[serde(default)]
    pub description: String,

    /// JSON schema of the builder options
    #[serde(default = "default_option_schema")]
    pub option_schema: Value,
}

fn default_option_schema() -> Value {
    Value::Bool(true)
}

impl BuilderInfo {
    /// Create builder info with an option schema.
    pub fn new(
        builder_name: impl Into<String>,
        description: impl Into<String>,
        option_schema: Value,
    ) -> Self {
        BuilderInfo {
            builder_name: builder_name.into(),
            description: description.into(),
            option_schema,
        }
    }
}

/// The input message delivered to a builder job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderInput {
    /// Run identifier, unique per process
    pub id: u64,

    /// Directory the run was started from
    pub current_directory: String,

    /// Workspace root directory
    pub workspace_root: String,

    /// Builder metadata
    pub info: BuilderInfo,

    /// Options, before merging and validation
    #[serde(default)]
    pub options: JsonObject,

    /// Target being run, when scheduled by target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,

    /// Target strings of the runs that scheduled this one, outermost first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
}

/// The result of a builder run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuilderOutput {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<BuilderInfo>,

    /// Builder-specific fields
    #[serde(flatten)]
    pub extra: JsonObject,
}

impl BuilderOutput {
    /// A successful output.
    pub fn success() -> Self {
        BuilderOutput {
            success: true,
            error: None,
            target: None,
            info: None,
            extra: JsonObject::new(),
        }
    }

    /// A failed output with no error message.
    pub fn failure() -> Self {
        BuilderOutput {
            success: false,
            ..Self::success()
        }
    }

    /// A failed output carrying an error message.
    pub fn error(message: impl Into<String>) -> Self {
        BuilderOutput {
            error: Some(message.into()),
            ..Self::failure()
        }
    }

    /// Attach a builder-specific field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Serialize to a JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Progress state of a builder run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuilderProgressState {
    Stopped,
    Error,
    Waiting,
    Running,
}

/// A progress event published on the `progress` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuilderProgressReport {
    /// Run identifier
    pub id: u64,

    /// Builder that produced the event
    pub builder: BuilderInfo,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,

    pub state: BuilderProgressState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
