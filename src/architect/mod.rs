//! The Architect facade: schedule builders and workspace targets.
//!
//! An [`Architect`] owns a [`Scheduler`] whose registry resolves, in order:
//! 1. target job names (`{project:target[:configuration]}`),
//! 2. builder job names (`pkg:builder`),
//! 3. the private meta jobs used by [`BuilderContext`],
//! 4. any additional registry supplied by the caller.
//!
//! Builder infos and job handlers are resolved lazily through the
//! [`ArchitectHost`] and cached for the life of the `Architect`.
//!
//! [`BuilderContext`]: crate::builder::BuilderContext

pub mod api;
pub mod error;
pub mod host;
mod job_handler;
pub(crate) mod meta_jobs;
mod registry;
pub mod workspace_host;

use std::sync::Arc;

use crate::core::job_name::{is_schedulable_builder_name, target_job_name};
use crate::core::options::JsonObject;
use crate::core::target::Target;
use crate::jobs::registry::{FallbackRegistry, Registry};
use crate::jobs::scheduler::Scheduler;
use crate::schema::{CoreSchemaRegistry, SchemaRegistry};

pub use api::{BuilderRun, ScheduleOptions};
pub use error::ArchitectError;
pub use host::{ArchitectHost, ProjectRef};
pub use workspace_host::{BuilderCatalog, WorkspaceArchitectHost};

use api::ScheduleByNameOptions;
use meta_jobs::MetaJobRegistry;
use registry::{ArchitectBuilderJobRegistry, ArchitectCache, ArchitectTargetJobRegistry};

/// Entry point for running builders.
pub struct Architect {
    host: Arc<dyn ArchitectHost>,
    scheduler: Scheduler,
}

impl std::fmt::Debug for Architect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Architect").finish_non_exhaustive()
    }
}

impl Architect {
    /// Create an Architect using the built-in schema registry.
    pub fn new(host: Arc<dyn ArchitectHost>) -> Self {
        Self::with_registries(host, Arc::new(CoreSchemaRegistry::new()), None)
    }

    /// Create an Architect with a custom schema registry and an optional
    /// registry consulted after the built-in ones.
    pub fn with_registries(
        host: Arc<dyn ArchitectHost>,
        schema_registry: Arc<dyn SchemaRegistry>,
        additional: Option<Arc<dyn Registry>>,
    ) -> Self {
        let cache = Arc::new(ArchitectCache::new());
        let targets: Arc<dyn Registry> = Arc::new(ArchitectTargetJobRegistry::new(
            host.clone(),
            schema_registry.clone(),
            cache.clone(),
        ));
        let builders: Arc<dyn Registry> = Arc::new(ArchitectBuilderJobRegistry::new(
            host.clone(),
            schema_registry.clone(),
            cache,
        ));
        let meta: Arc<dyn Registry> = Arc::new(MetaJobRegistry::new(host.clone(), schema_registry.clone()));

        let mut registry = FallbackRegistry::new(vec![targets, builders, meta]);
        if let Some(additional) = additional {
            registry.push(additional);
        }

        Architect {
            scheduler: Scheduler::new(Arc::new(registry), schema_registry),
            host,
        }
    }

    /// The scheduler every run goes through.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn host(&self) -> &Arc<dyn ArchitectHost> {
        &self.host
    }

    /// Whether `name` resolves to a job.
    pub async fn has(&self, name: &str) -> Result<bool, ArchitectError> {
        Ok(self.scheduler.has(name).await?)
    }

    /// Run a builder by name (`pkg:builder`).
    pub async fn schedule_builder(
        &self,
        name: &str,
        options: JsonObject,
        schedule_options: ScheduleOptions,
    ) -> Result<BuilderRun, ArchitectError> {
        if !is_schedulable_builder_name(name) {
            return Err(ArchitectError::InvalidBuilderName(name.to_string()));
        }
        tracing::debug!("scheduling builder `{}`", name);

        let options_for_run = self.run_options(schedule_options, None).await?;
        api::schedule_by_name(name, options, options_for_run).await
    }

    /// Run a workspace target. `overrides` are merged on top of the target's
    /// configured options.
    pub async fn schedule_target(
        &self,
        target: &Target,
        overrides: JsonObject,
        schedule_options: ScheduleOptions,
    ) -> Result<BuilderRun, ArchitectError> {
        tracing::debug!("scheduling target `{}`", target_job_name(target));

        let options_for_run = self.run_options(schedule_options, Some(target.clone())).await?;
        api::schedule_by_target(target, overrides, options_for_run).await
    }

    async fn run_options(
        &self,
        options: ScheduleOptions,
        target: Option<Target>,
    ) -> Result<ScheduleByNameOptions, ArchitectError> {
        let workspace_root = self.host.get_workspace_root().await.map_err(ArchitectError::host)?;
        let current_directory = self.host.get_current_directory().await.map_err(ArchitectError::host)?;
        Ok(ScheduleByNameOptions {
            scheduler: self.scheduler.clone(),
            workspace_root,
            current_directory,
            logger: options.logger,
            target,
            parents: Vec::new(),
        })
    }
}
