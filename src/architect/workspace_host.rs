//! An [`ArchitectHost`] backed by a workspace file and a builder catalog.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::architect::host::{ArchitectHost, ProjectRef};
use crate::builder::builtin::builtin_builders;
use crate::builder::create::Builder;
use crate::core::builder_types::BuilderInfo;
use crate::core::options::JsonObject;
use crate::core::target::Target;
use crate::core::workspace::WorkspaceDefinition;

/// Builders available to a workspace, keyed by `pkg:builder`.
#[derive(Debug, Clone, Default)]
pub struct BuilderCatalog {
    builders: BTreeMap<String, (BuilderInfo, Builder)>,
}

impl BuilderCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog holding the built-in builders.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        for (info, builder) in builtin_builders() {
            catalog.builders.insert(info.builder_name.clone(), (info, builder));
        }
        catalog
    }

    /// Add or replace a builder.
    pub fn register(
        &mut self,
        builder_name: impl Into<String>,
        description: impl Into<String>,
        option_schema: Value,
        builder: Builder,
    ) {
        let info = BuilderInfo::new(builder_name, description, option_schema);
        self.builders.insert(info.builder_name.clone(), (info, builder));
    }

    pub fn info(&self, builder_name: &str) -> Option<&BuilderInfo> {
        self.builders.get(builder_name).map(|(info, _)| info)
    }

    pub fn builder(&self, builder_name: &str) -> Option<&Builder> {
        self.builders.get(builder_name).map(|(_, builder)| builder)
    }

    /// Registered builder names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.builders.keys().map(String::as_str)
    }
}

/// Host for a workspace on disk.
#[derive(Debug)]
pub struct WorkspaceArchitectHost {
    root: PathBuf,
    current_directory: PathBuf,
    workspace: WorkspaceDefinition,
    catalog: BuilderCatalog,
}

impl WorkspaceArchitectHost {
    pub fn new(root: impl Into<PathBuf>, workspace: WorkspaceDefinition, catalog: BuilderCatalog) -> Self {
        let root = root.into();
        WorkspaceArchitectHost {
            current_directory: root.clone(),
            root,
            workspace,
            catalog,
        }
    }

    /// Load the workspace file at `path`. Its directory becomes the workspace root.
    pub fn load(path: &Path, catalog: BuilderCatalog) -> Result<Self> {
        let workspace = WorkspaceDefinition::load(path)?;
        let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(Self::new(root, workspace, catalog))
    }

    /// Directory runs report as their current directory.
    pub fn with_current_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_directory = dir.into();
        self
    }

    pub fn workspace(&self) -> &WorkspaceDefinition {
        &self.workspace
    }

    pub fn catalog(&self) -> &BuilderCatalog {
        &self.catalog
    }
}

#[async_trait]
impl ArchitectHost for WorkspaceArchitectHost {
    async fn get_builder_name_for_target(&self, target: &Target) -> Result<Option<String>> {
        Ok(self.workspace.target(target).map(|t| t.builder.clone()))
    }

    async fn resolve_builder(&self, builder_name: &str) -> Result<Option<BuilderInfo>> {
        Ok(self.catalog.info(builder_name).cloned())
    }

    async fn load_builder(&self, info: &BuilderInfo) -> Result<Option<Builder>> {
        Ok(self.catalog.builder(&info.builder_name).cloned())
    }

    async fn get_current_directory(&self) -> Result<String> {
        Ok(self.current_directory.display().to_string())
    }

    async fn get_workspace_root(&self) -> Result<String> {
        Ok(self.root.display().to_string())
    }

    async fn get_options_for_target(&self, target: &Target) -> Result<Option<JsonObject>> {
        self.workspace.options_for_target(target)
    }

    async fn get_project_metadata(&self, project: &ProjectRef) -> Result<Option<JsonObject>> {
        Ok(self.workspace.project_metadata(project.project_name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn host() -> WorkspaceArchitectHost {
        let workspace = WorkspaceDefinition::from_json_str(
            r#"{
                "projects": {
                    "app": {
                        "root": "apps/app",
                        "targets": {
                            "build": {
                                "builder": "@architect/builtin:true",
                                "options": {"a": 1},
                                "configurations": {"prod": {"a": 2}}
                            }
                        }
                    }
                }
            }"#,
        )
        .unwrap();
        WorkspaceArchitectHost::new("/ws", workspace, BuilderCatalog::with_builtins())
    }

    #[tokio::test]
    async fn test_resolves_targets_through_the_workspace() {
        let host = host();
        let target = Target::new("app", "build").with_configuration("prod");

        let builder = host.get_builder_name_for_target(&target).await.unwrap();
        assert_eq!(builder.as_deref(), Some("@architect/builtin:true"));

        let options = host.get_options_for_target(&target).await.unwrap().unwrap();
        assert_eq!(options["a"], json!(2));

        let info = host.resolve_builder("@architect/builtin:true").await.unwrap().unwrap();
        assert!(host.load_builder(&info).await.unwrap().is_some());
        assert!(host.resolve_builder("pkg:nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_project_metadata_through_a_target() {
        let host = host();
        let metadata = host
            .get_project_metadata(&ProjectRef::from(Target::new("app", "build")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metadata["root"], "apps/app");
        assert_eq!(host.get_workspace_root().await.unwrap(), "/ws");
    }

    #[test]
    fn test_register_replaces() {
        let mut catalog = BuilderCatalog::with_builtins();
        catalog.register("@architect/builtin:true", "replaced", json!(true), crate::builder::builtin::false_builder());
        assert_eq!(catalog.info("@architect/builtin:true").unwrap().description, "replaced");
        assert_eq!(catalog.names().count(), 4);
    }
}
