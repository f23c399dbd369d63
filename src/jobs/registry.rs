//! Job registries - resolving a job name to a handler.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::core::job_name::parse_module_job_name;
use crate::jobs::error::JobError;
use crate::jobs::handler::JobHandler;

/// Resolves job names to handlers.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Look up a handler. `Ok(None)` means this registry does not know the name.
    async fn get(&self, name: &str) -> Result<Option<Arc<dyn JobHandler>>, JobError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A registry of explicitly registered handlers.
#[derive(Default)]
pub struct SimpleJobRegistry {
    handlers: Mutex<HashMap<String, Arc<dyn JobHandler>>>,
}

impl SimpleJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`.
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn JobHandler>) -> Result<(), JobError> {
        let name = name.into();
        let mut handlers = lock(&self.handlers);
        if handlers.contains_key(&name) {
            return Err(JobError::JobNameAlreadyRegistered(name));
        }
        tracing::debug!("registered job handler `{}`", name);
        handlers.insert(name, handler);
        Ok(())
    }

    /// Names of all registered handlers, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.handlers).keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl Registry for SimpleJobRegistry {
    async fn get(&self, name: &str) -> Result<Option<Arc<dyn JobHandler>>, JobError> {
        Ok(lock(&self.handlers).get(name).cloned())
    }
}

/// Tries a list of registries in order; the first one that knows a name wins.
#[derive(Default)]
pub struct FallbackRegistry {
    registries: Vec<Arc<dyn Registry>>,
}

impl FallbackRegistry {
    pub fn new(registries: Vec<Arc<dyn Registry>>) -> Self {
        FallbackRegistry { registries }
    }

    /// Append a registry with the lowest priority.
    pub fn push(&mut self, registry: Arc<dyn Registry>) {
        self.registries.push(registry);
    }

    pub fn len(&self) -> usize {
        self.registries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }
}

#[async_trait]
impl Registry for FallbackRegistry {
    async fn get(&self, name: &str) -> Result<Option<Arc<dyn JobHandler>>, JobError> {
        for registry in &self.registries {
            if let Some(handler) = registry.get(name).await? {
                return Ok(Some(handler));
            }
        }
        Ok(None)
    }
}

/// Loads job handlers exported by a package.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Load `export` from `package`. `Ok(None)` if either does not exist.
    async fn load(&self, package: &str, export: &str) -> anyhow::Result<Option<Arc<dyn JobHandler>>>;
}

/// Resolves `pkg#export` job names through a [`ModuleLoader`].
///
/// A name without `#` refers to the package's `default` export. Loaded
/// handlers are cached for the life of the registry.
pub struct ModuleJobRegistry<L> {
    loader: L,
    cache: Mutex<HashMap<String, Arc<dyn JobHandler>>>,
}

impl<L: ModuleLoader> ModuleJobRegistry<L> {
    pub fn new(loader: L) -> Self {
        ModuleJobRegistry {
            loader,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<L: ModuleLoader> Registry for ModuleJobRegistry<L> {
    async fn get(&self, name: &str) -> Result<Option<Arc<dyn JobHandler>>, JobError> {
        let Some((package, export)) = parse_module_job_name(name) else {
            return Ok(None);
        };
        let key = format!("{}#{}", package, export);
        let cached = lock(&self.cache).get(&key).cloned();
        if cached.is_some() {
            return Ok(cached);
        }

        let handler = self.loader.load(package, export).await?;
        if let Some(handler) = &handler {
            tracing::debug!("loaded job `{}`", key);
            lock(&self.cache).insert(key, handler.clone());
        }
        Ok(handler)
    }
}
