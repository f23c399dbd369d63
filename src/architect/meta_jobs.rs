//! Private jobs backing the workspace queries of [`BuilderContext`].
//!
//! They are resolved through the same scheduler as builders, so a builder
//! only ever talks to the runtime through jobs.
//!
//! [`BuilderContext`]: crate::builder::BuilderContext

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::stream::StreamExt;
use serde_json::{json, Value};

use crate::architect::error::ArchitectError;
use crate::architect::host::{ArchitectHost, ProjectRef};
use crate::core::options::JsonObject;
use crate::core::target::{target_string_from_target, Target};
use crate::jobs::error::JobError;
use crate::jobs::handler::{create_job_handler, JobHandler};
use crate::jobs::registry::Registry;
use crate::jobs::scheduler::Scheduler;
use crate::jobs::types::JobDescription;
use crate::schema::SchemaRegistry;

pub const GET_TARGET_OPTIONS: &str = "..getTargetOptions";
pub const GET_BUILDER_NAME_FOR_TARGET: &str = "..getBuilderNameForTarget";
pub const VALIDATE_OPTIONS: &str = "..validateOptions";
pub const GET_PROJECT_METADATA: &str = "..getProjectMetadata";

fn target_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "project": {"type": "string"},
            "target": {"type": "string"},
            "configuration": {"type": "string"}
        },
        "required": ["project", "target"]
    })
}

/// Schedule a meta job and wait for its single output.
pub(crate) async fn run(scheduler: &Scheduler, name: &str, argument: Value) -> Result<Value, ArchitectError> {
    let job = scheduler.schedule(name, argument);
    match job.output().next().await {
        Some(Ok(value)) => Ok(value),
        Some(Err(error)) => Err(error.into()),
        None => Err(ArchitectError::NoOutput(name.to_string())),
    }
}

/// Registry of the four meta jobs.
pub(crate) struct MetaJobRegistry {
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
}

impl MetaJobRegistry {
    pub(crate) fn new(host: Arc<dyn ArchitectHost>, schema_registry: Arc<dyn SchemaRegistry>) -> Self {
        let mut handlers = HashMap::new();
        handlers.insert(GET_TARGET_OPTIONS, get_target_options(host.clone()));
        handlers.insert(GET_BUILDER_NAME_FOR_TARGET, get_builder_name_for_target(host.clone()));
        handlers.insert(VALIDATE_OPTIONS, validate_options(host.clone(), schema_registry));
        handlers.insert(GET_PROJECT_METADATA, get_project_metadata(host));
        MetaJobRegistry { handlers }
    }
}

#[async_trait]
impl Registry for MetaJobRegistry {
    async fn get(&self, name: &str) -> Result<Option<Arc<dyn JobHandler>>, JobError> {
        Ok(self.handlers.get(name).cloned())
    }
}

fn get_target_options(host: Arc<dyn ArchitectHost>) -> Arc<dyn JobHandler> {
    let description = JobDescription::new(GET_TARGET_OPTIONS)
        .with_argument(target_schema())
        .with_output(json!({"type": "object"}));

    create_job_handler(description, move |argument, _context| {
        let host = host.clone();
        async move {
            let target: Target = serde_json::from_value(argument.clone())?;
            match host.get_options_for_target(&target).await? {
                Some(options) => Ok(Value::Object(options)),
                None => Err(anyhow!("Invalid target: {}.", argument)),
            }
        }
    })
}

fn get_builder_name_for_target(host: Arc<dyn ArchitectHost>) -> Arc<dyn JobHandler> {
    let description = JobDescription::new(GET_BUILDER_NAME_FOR_TARGET)
        .with_argument(target_schema())
        .with_output(json!({"type": "string"}));

    create_job_handler(description, move |argument, _context| {
        let host = host.clone();
        async move {
            let target: Target = serde_json::from_value(argument)?;
            match host.get_builder_name_for_target(&target).await? {
                Some(name) => Ok(Value::String(name)),
                None => Err(anyhow!(
                    "No builder were found for target {}.",
                    target_string_from_target(&target)
                )),
            }
        }
    })
}

fn validate_options(host: Arc<dyn ArchitectHost>, schema_registry: Arc<dyn SchemaRegistry>) -> Arc<dyn JobHandler> {
    let description = JobDescription::new(VALIDATE_OPTIONS)
        .with_argument(json!({
            "type": "array",
            "items": [{"type": "string"}, {"type": "object"}]
        }))
        .with_output(json!({"type": "object"}));

    create_job_handler(description, move |argument, _context| {
        let host = host.clone();
        let schema_registry = schema_registry.clone();
        async move {
            let (builder_name, options): (String, JsonObject) = serde_json::from_value(argument)?;
            let info = host
                .resolve_builder(&builder_name)
                .await?
                .ok_or_else(|| anyhow!("No builder info were found for builder {:?}.", builder_name))?;

            let validator = schema_registry.compile(&info.option_schema).await?;
            let data = validator.validate(Value::Object(options)).into_result()?;
            Ok(data)
        }
    })
}

fn get_project_metadata(host: Arc<dyn ArchitectHost>) -> Arc<dyn JobHandler> {
    let description = JobDescription::new(GET_PROJECT_METADATA)
        .with_argument(json!({"anyOf": [{"type": "string"}, target_schema()]}))
        .with_output(json!({"type": "object"}));

    create_job_handler(description, move |argument, _context| {
        let host = host.clone();
        async move {
            let project = match &argument {
                Value::String(name) => ProjectRef::Name(name.clone()),
                other => ProjectRef::Target(serde_json::from_value(other.clone())?),
            };
            match host.get_project_metadata(&project).await? {
                Some(metadata) => Ok(Value::Object(metadata)),
                None => Err(anyhow!("Invalid target or project: {}.", argument)),
            }
        }
    })
}
