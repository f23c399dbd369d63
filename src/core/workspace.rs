//! Workspace definition - projects, targets and their configurations.
//!
//! A workspace file is a JSON document:
//!
//! ```json
//! {
//!   "projects": {
//!     "app": {
//!       "root": "projects/app",
//!       "targets": {
//!         "build": {
//!           "builder": "@architect/builtin:true",
//!           "options": { "verbose": false },
//!           "configurations": { "production": { "optimize": true } },
//!           "defaultConfiguration": "production"
//!         }
//!       }
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::options::{merge_options, JsonObject};
use crate::core::target::Target;

/// Default workspace file name.
pub const WORKSPACE_FILE_NAME: &str = "architect.json";

/// Alternate workspace file name accepted for compatibility.
pub const WORKSPACE_FILE_ALIAS: &str = "workspace.json";

/// Error locating a workspace file.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("could not find `{WORKSPACE_FILE_NAME}` or `{WORKSPACE_FILE_ALIAS}` in `{}` or any parent directory", dir.display())]
    NotFound { dir: PathBuf },

    #[error("project `{0}` does not exist in the workspace")]
    UnknownProject(String),

    #[error("configuration `{configuration}` is not set in the workspace for target `{target}`")]
    UnknownConfiguration { target: String, configuration: String },
}

/// The parsed workspace file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceDefinition {
    /// Workspace file format version
    #[serde(default = "default_version")]
    pub version: u32,

    /// Projects by name
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectDefinition>,
}

fn default_version() -> u32 {
    1
}

/// A project within the workspace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDefinition {
    /// Project root relative to the workspace root
    #[serde(default)]
    pub root: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_root: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Targets by name
    #[serde(default, alias = "architect")]
    pub targets: BTreeMap<String, TargetDefinition>,

    /// Any other project fields; exposed as project metadata
    #[serde(flatten)]
    pub extensions: JsonObject,
}

/// A target within a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDefinition {
    /// Builder name (`pkg:builder`)
    pub builder: String,

    /// Base options
    #[serde(default)]
    pub options: JsonObject,

    /// Named option overrides
    #[serde(default)]
    pub configurations: BTreeMap<String, JsonObject>,

    /// Configuration applied when the target names none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_configuration: Option<String>,
}

impl WorkspaceDefinition {
    /// Load a workspace definition from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read workspace file: {}", path.display()))?;

        Self::from_json_str(&contents)
            .with_context(|| format!("failed to parse workspace file: {}", path.display()))
    }

    /// Parse a workspace definition from JSON text.
    pub fn from_json_str(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Get a project by name.
    pub fn project(&self, name: &str) -> Option<&ProjectDefinition> {
        self.projects.get(name)
    }

    /// Get the definition backing a target address.
    pub fn target(&self, target: &Target) -> Option<&TargetDefinition> {
        self.project(&target.project)?.targets.get(&target.target)
    }

    /// Project metadata: every project field except its targets.
    pub fn project_metadata(&self, name: &str) -> Option<JsonObject> {
        let project = self.project(name)?;
        let mut metadata = project.extensions.clone();
        metadata.insert("root".into(), Value::String(project.root.clone()));
        if let Some(source_root) = &project.source_root {
            metadata.insert("sourceRoot".into(), Value::String(source_root.clone()));
        }
        if let Some(prefix) = &project.prefix {
            metadata.insert("prefix".into(), Value::String(prefix.clone()));
        }
        Some(metadata)
    }

    /// Resolve the options of a target.
    ///
    /// Base options first, then each named configuration in order. A target
    /// without a configuration uses the target's `defaultConfiguration`.
    pub fn options_for_target(&self, target: &Target) -> Result<Option<JsonObject>> {
        let Some(definition) = self.target(target) else {
            return Ok(None);
        };

        let configurations: Vec<&str> = match &target.configuration {
            Some(_) => target.configurations(),
            None => definition
                .default_configuration
                .as_deref()
                .map(|c| c.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
                .unwrap_or_default(),
        };

        let mut options = definition.options.clone();
        for name in configurations {
            let overrides = definition.configurations.get(name).ok_or_else(|| {
                WorkspaceError::UnknownConfiguration {
                    target: format!("{}:{}", target.project, target.target),
                    configuration: name.to_string(),
                }
            })?;
            options = merge_options(&options, Some(overrides));
        }

        Ok(Some(options))
    }
}

/// Find the workspace file starting from `dir` and searching upward.
pub fn find_workspace_file(dir: &Path) -> Result<PathBuf, WorkspaceError> {
    let mut current = dir.to_path_buf();
    loop {
        for name in [WORKSPACE_FILE_NAME, WORKSPACE_FILE_ALIAS] {
            let candidate = current.join(name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        if !current.pop() {
            return Err(WorkspaceError::NotFound {
                dir: dir.to_path_buf(),
            });
        }
    }
}
