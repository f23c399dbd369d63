//! The host contract: how Architect learns about builders and targets.

use async_trait::async_trait;

use crate::builder::create::Builder;
use crate::core::builder_types::BuilderInfo;
use crate::core::options::JsonObject;
use crate::core::target::Target;

/// Reference to a project: by name, or through one of its targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectRef {
    Name(String),
    Target(Target),
}

impl ProjectRef {
    /// The project name.
    pub fn project_name(&self) -> &str {
        match self {
            ProjectRef::Name(name) => name,
            ProjectRef::Target(target) => &target.project,
        }
    }
}

impl From<&str> for ProjectRef {
    fn from(name: &str) -> Self {
        ProjectRef::Name(name.to_string())
    }
}

impl From<String> for ProjectRef {
    fn from(name: String) -> Self {
        ProjectRef::Name(name)
    }
}

impl From<Target> for ProjectRef {
    fn from(target: Target) -> Self {
        ProjectRef::Target(target)
    }
}

impl From<&Target> for ProjectRef {
    fn from(target: &Target) -> Self {
        ProjectRef::Target(target.clone())
    }
}

/// Resolves builders and workspace data for Architect.
///
/// `Ok(None)` means "not found"; errors are propagated to the caller unchanged.
#[async_trait]
pub trait ArchitectHost: Send + Sync {
    /// Builder name (`pkg:builder`) configured for a target.
    async fn get_builder_name_for_target(&self, target: &Target) -> anyhow::Result<Option<String>>;

    /// Metadata of a builder.
    async fn resolve_builder(&self, builder_name: &str) -> anyhow::Result<Option<BuilderInfo>>;

    /// Load the builder described by `info`.
    async fn load_builder(&self, info: &BuilderInfo) -> anyhow::Result<Option<Builder>>;

    async fn get_current_directory(&self) -> anyhow::Result<String>;

    async fn get_workspace_root(&self) -> anyhow::Result<String>;

    /// Workspace options of a target, with its configurations applied.
    async fn get_options_for_target(&self, target: &Target) -> anyhow::Result<Option<JsonObject>>;

    async fn get_project_metadata(&self, project: &ProjectRef) -> anyhow::Result<Option<JsonObject>>;
}
