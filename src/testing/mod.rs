//! An in-memory [`ArchitectHost`] for tests.
//!
//! Builders, targets and project metadata are registered up front (or at any
//! time, through `&self`) and looked up by exact name:
//!
//! ```rust,ignore
//! use architect::testing::TestingArchitectHost;
//!
//! let host = TestingArchitectHost::new();
//! host.add_builder("pkg:echo", echo_builder(), "Echo", json!({"type": "object"}));
//! host.add_target(Target::new("app", "echo"), "pkg:echo", JsonObject::new());
//! let architect = Architect::new(Arc::new(host));
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::architect::host::{ArchitectHost, ProjectRef};
use crate::builder::create::Builder;
use crate::core::builder_types::BuilderInfo;
use crate::core::options::JsonObject;
use crate::core::target::{target_string_from_target, Target};

#[derive(Default)]
struct HostState {
    builders: HashMap<String, (BuilderInfo, Option<Builder>)>,
    targets: HashMap<String, (String, JsonObject)>,
    projects: HashMap<String, JsonObject>,
}

/// Host whose workspace lives in memory.
///
/// Targets are keyed by their full target string, configuration included:
/// `app:build` and `app:build:prod` are separate entries.
pub struct TestingArchitectHost {
    workspace_root: String,
    current_directory: String,
    state: Mutex<HostState>,
}

impl Default for TestingArchitectHost {
    fn default() -> Self {
        Self::new()
    }
}

impl TestingArchitectHost {
    /// A host rooted at `/workspace`.
    pub fn new() -> Self {
        Self::with_root("/workspace", "/workspace")
    }

    pub fn with_root(workspace_root: impl Into<String>, current_directory: impl Into<String>) -> Self {
        TestingArchitectHost {
            workspace_root: workspace_root.into(),
            current_directory: current_directory.into(),
            state: Mutex::new(HostState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a loadable builder.
    pub fn add_builder(
        &self,
        builder_name: impl Into<String>,
        builder: Builder,
        description: impl Into<String>,
        option_schema: Value,
    ) {
        let info = BuilderInfo::new(builder_name, description, option_schema);
        self.state()
            .builders
            .insert(info.builder_name.clone(), (info, Some(builder)));
    }

    /// Register builder metadata without an implementation. Loading it yields
    /// nothing.
    pub fn add_builder_info(&self, info: BuilderInfo) {
        self.state()
            .builders
            .insert(info.builder_name.clone(), (info, None));
    }

    /// Register a target running `builder_name` with `options`.
    pub fn add_target(&self, target: Target, builder_name: impl Into<String>, options: JsonObject) {
        self.state().targets.insert(
            target_string_from_target(&target),
            (builder_name.into(), options),
        );
    }

    pub fn add_project_metadata(&self, project: impl Into<String>, metadata: JsonObject) {
        self.state().projects.insert(project.into(), metadata);
    }
}

#[async_trait]
impl ArchitectHost for TestingArchitectHost {
    async fn get_builder_name_for_target(&self, target: &Target) -> Result<Option<String>> {
        Ok(self
            .state()
            .targets
            .get(&target_string_from_target(target))
            .map(|(builder, _)| builder.clone()))
    }

    async fn resolve_builder(&self, builder_name: &str) -> Result<Option<BuilderInfo>> {
        Ok(self.state().builders.get(builder_name).map(|(info, _)| info.clone()))
    }

    async fn load_builder(&self, info: &BuilderInfo) -> Result<Option<Builder>> {
        Ok(self
            .state()
            .builders
            .get(&info.builder_name)
            .and_then(|(_, builder)| builder.clone()))
    }

    async fn get_current_directory(&self) -> Result<String> {
        Ok(self.current_directory.clone())
    }

    async fn get_workspace_root(&self) -> Result<String> {
        Ok(self.workspace_root.clone())
    }

    async fn get_options_for_target(&self, target: &Target) -> Result<Option<JsonObject>> {
        Ok(self
            .state()
            .targets
            .get(&target_string_from_target(target))
            .map(|(_, options)| options.clone()))
    }

    async fn get_project_metadata(&self, project: &ProjectRef) -> Result<Option<JsonObject>> {
        Ok(self.state().projects.get(project.project_name()).cloned())
    }
}
