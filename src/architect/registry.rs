//! Registries resolving builder names and target names to builder jobs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use async_trait::async_trait;

use crate::architect::host::ArchitectHost;
use crate::architect::job_handler::BuilderJobHandler;
use crate::core::builder_types::BuilderInfo;
use crate::core::job_name::{is_builder_job_name, parse_target_job_name};
use crate::core::options::JsonObject;
use crate::core::target::target_string_from_target;
use crate::jobs::error::JobError;
use crate::jobs::handler::JobHandler;
use crate::jobs::registry::Registry;
use crate::schema::SchemaRegistry;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Resolved builder infos and job handlers, shared by the builder and target
/// registries of one `Architect`. Entries live as long as the cache.
#[derive(Default)]
pub(crate) struct ArchitectCache {
    info: Mutex<HashMap<String, Option<BuilderInfo>>>,
    handlers: Mutex<HashMap<String, Arc<dyn JobHandler>>>,
}

impl ArchitectCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn handler(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        lock(&self.handlers).get(name).cloned()
    }

    fn insert_handler(&self, name: &str, handler: Arc<dyn JobHandler>) -> Arc<dyn JobHandler> {
        // Two concurrent resolutions of the same name keep the first handler.
        lock(&self.handlers).entry(name.to_string()).or_insert(handler).clone()
    }

    /// Resolve builder info through the host, caching found and not-found
    /// results alike. Host errors are not cached.
    async fn builder_info(&self, host: &dyn ArchitectHost, builder_name: &str) -> anyhow::Result<Option<BuilderInfo>> {
        let cached = lock(&self.info).get(builder_name).cloned();
        if let Some(info) = cached {
            return Ok(info);
        }

        let info = host.resolve_builder(builder_name).await?;
        lock(&self.info).insert(builder_name.to_string(), info.clone());
        Ok(info)
    }
}

/// Resolves `pkg:builder` job names.
pub(crate) struct ArchitectBuilderJobRegistry {
    host: Arc<dyn ArchitectHost>,
    schema_registry: Arc<dyn SchemaRegistry>,
    cache: Arc<ArchitectCache>,
}

impl ArchitectBuilderJobRegistry {
    pub(crate) fn new(
        host: Arc<dyn ArchitectHost>,
        schema_registry: Arc<dyn SchemaRegistry>,
        cache: Arc<ArchitectCache>,
    ) -> Self {
        ArchitectBuilderJobRegistry {
            host,
            schema_registry,
            cache,
        }
    }
}

#[async_trait]
impl Registry for ArchitectBuilderJobRegistry {
    async fn get(&self, name: &str) -> Result<Option<Arc<dyn JobHandler>>, JobError> {
        if !is_builder_job_name(name) {
            return Ok(None);
        }
        if let Some(handler) = self.cache.handler(name) {
            return Ok(Some(handler));
        }

        let Some(info) = self.cache.builder_info(self.host.as_ref(), name).await? else {
            return Ok(None);
        };
        tracing::debug!("resolved builder `{}`", name);

        let handler: Arc<dyn JobHandler> = Arc::new(BuilderJobHandler::new(
            info,
            None,
            JsonObject::new(),
            self.host.clone(),
            self.schema_registry.clone(),
        ));
        Ok(Some(self.cache.insert_handler(name, handler)))
    }
}

/// Resolves `{project:target[:configuration]}` job names.
///
/// The handler runs the target's builder with the target's workspace options
/// as base options.
pub(crate) struct ArchitectTargetJobRegistry {
    host: Arc<dyn ArchitectHost>,
    schema_registry: Arc<dyn SchemaRegistry>,
    cache: Arc<ArchitectCache>,
}

impl ArchitectTargetJobRegistry {
    pub(crate) fn new(
        host: Arc<dyn ArchitectHost>,
        schema_registry: Arc<dyn SchemaRegistry>,
        cache: Arc<ArchitectCache>,
    ) -> Self {
        ArchitectTargetJobRegistry {
            host,
            schema_registry,
            cache,
        }
    }
}

#[async_trait]
impl Registry for ArchitectTargetJobRegistry {
    async fn get(&self, name: &str) -> Result<Option<Arc<dyn JobHandler>>, JobError> {
        let Some(target) = parse_target_job_name(name) else {
            return Ok(None);
        };
        if let Some(handler) = self.cache.handler(name) {
            return Ok(Some(handler));
        }

        let builder_name = self
            .host
            .get_builder_name_for_target(&target)
            .await?
            .ok_or_else(|| anyhow!("No builder were found for target {}.", target_string_from_target(&target)))?;

        let info = self
            .cache
            .builder_info(self.host.as_ref(), &builder_name)
            .await?
            .ok_or_else(|| anyhow!("No builder info were found for builder {:?}.", builder_name))?;

        let options = match self.host.get_options_for_target(&target).await? {
            Some(options) => options,
            None => {
                let target = serde_json::to_string(&target).unwrap_or_default();
                return Err(JobError::message(format!("Invalid target: {}.", target)));
            }
        };
        tracing::debug!("resolved target `{}` to builder `{}`", name, builder_name);

        let handler: Arc<dyn JobHandler> = Arc::new(BuilderJobHandler::new(
            info,
            Some(target),
            options,
            self.host.clone(),
            self.schema_registry.clone(),
        ));
        Ok(Some(self.cache.insert_handler(name, handler)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::target::Target;
    use crate::schema::CoreSchemaRegistry;
    use crate::testing::TestingArchitectHost;
    use serde_json::json;

    fn registries(host: TestingArchitectHost) -> (ArchitectBuilderJobRegistry, ArchitectTargetJobRegistry) {
        let host: Arc<dyn ArchitectHost> = Arc::new(host);
        let schema_registry: Arc<dyn SchemaRegistry> = Arc::new(CoreSchemaRegistry::new());
        let cache = Arc::new(ArchitectCache::new());
        (
            ArchitectBuilderJobRegistry::new(host.clone(), schema_registry.clone(), cache.clone()),
            ArchitectTargetJobRegistry::new(host, schema_registry, cache),
        )
    }

    #[tokio::test]
    async fn test_registries_ignore_foreign_names() {
        let (builders, targets) = registries(TestingArchitectHost::new());
        assert!(builders.get("{app:build}").await.unwrap().is_none());
        assert!(builders.get("..getTargetOptions").await.unwrap().is_none());
        assert!(targets.get("pkg:builder").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_builder_handlers_are_cached() {
        let host = TestingArchitectHost::new();
        host.add_builder_info(BuilderInfo::new("pkg:b", "A builder", json!(true)));
        let (builders, _) = registries(host);

        let first = builders.get("pkg:b").await.unwrap().unwrap();
        let second = builders.get("pkg:b").await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.description().info.unwrap()["description"], "A builder");

        assert!(builders.get("pkg:missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_target_without_builder_errors() {
        let (_, targets) = registries(TestingArchitectHost::new());
        let err = match targets.get("{app:build}").await {
            Err(err) => err,
            Ok(_) => panic!("expected an error"),
        };
        assert_eq!(err.to_string(), "No builder were found for target app:build.");
    }

    #[tokio::test]
    async fn test_target_resolves_through_its_builder() {
        let host = TestingArchitectHost::new();
        host.add_builder_info(BuilderInfo::new("pkg:b", "", json!(true)));
        host.add_target(Target::new("app", "build"), "pkg:b", JsonObject::new());
        let (_, targets) = registries(host);

        let handler = targets.get("{app:build}").await.unwrap().unwrap();
        assert_eq!(handler.description().info.unwrap()["builderName"], "pkg:b");
    }
}
