//! The job handler Architect registers for every builder and target.
//!
//! It sits in front of the handler returned by the host's loaded builder and
//! does three things: merge base (target) options into each input, validate
//! the merged options against the builder's schema, and stamp the target on
//! every output. Validation failures are merged onto the output stream, which
//! ends when the builder's own stream ends.

use std::sync::Arc;

use futures::channel::mpsc;
use futures::future;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio::sync::OnceCell;

use crate::architect::host::ArchitectHost;
use crate::core::builder_types::{BuilderInfo, BuilderInput};
use crate::core::options::{merge_options, JsonObject};
use crate::core::target::Target;
use crate::jobs::error::JobError;
use crate::jobs::handler::{merge_until_complete, JobHandler, JobHandlerContext, JobOutputStream};
use crate::jobs::types::{JobDescription, JobInboundMessage};
use crate::schema::{SchemaRegistry, SchemaValidator};

pub(crate) struct BuilderJobHandler {
    info: BuilderInfo,
    target: Option<Target>,
    base_options: JsonObject,
    host: Arc<dyn ArchitectHost>,
    schema_registry: Arc<dyn SchemaRegistry>,
    validator: Arc<OnceCell<Arc<dyn SchemaValidator>>>,
}

impl BuilderJobHandler {
    pub(crate) fn new(
        info: BuilderInfo,
        target: Option<Target>,
        base_options: JsonObject,
        host: Arc<dyn ArchitectHost>,
        schema_registry: Arc<dyn SchemaRegistry>,
    ) -> Self {
        BuilderJobHandler {
            info,
            target,
            base_options,
            host,
            schema_registry,
            validator: Arc::new(OnceCell::new()),
        }
    }
}

impl JobHandler for BuilderJobHandler {
    fn description(&self) -> JobDescription {
        let info = serde_json::to_value(&self.info).unwrap_or(Value::Null);
        JobDescription::new(self.info.builder_name.clone())
            .with_info(info)
            .with_channel("progress", json!(true))
            .with_channel("log", json!(true))
    }

    fn handle(&self, argument: Value, context: JobHandlerContext) -> JobOutputStream {
        let JobHandlerContext {
            description,
            scheduler,
            inbound_bus,
            scope,
        } = context;

        // Inputs reach the builder only after validation.
        let (validated_tx, validated_rx) = mpsc::unbounded();
        let base_options = self.base_options.clone();
        let option_schema = self.info.option_schema.clone();
        let schema_registry = self.schema_registry.clone();
        let validator = self.validator.clone();
        let validation_errors: JobOutputStream = inbound_bus
            .then(move |message| {
                let validated_tx = validated_tx.clone();
                let base_options = base_options.clone();
                let option_schema = option_schema.clone();
                let schema_registry = schema_registry.clone();
                let validator = validator.clone();
                async move {
                    let message = match message {
                        JobInboundMessage::Input(value) => {
                            let validator = match validator
                                .get_or_try_init(|| async { schema_registry.compile(&option_schema).await })
                                .await
                            {
                                Ok(validator) => validator.clone(),
                                Err(e) => return Some(Err(JobError::from(e))),
                            };
                            match validate_input(value, &base_options, validator.as_ref()) {
                                Ok(value) => JobInboundMessage::Input(value),
                                Err(error) => return Some(Err(error)),
                            }
                        }
                        other => other,
                    };
                    let _ = validated_tx.unbounded_send(message);
                    None
                }
            })
            .filter_map(future::ready)
            .boxed();

        let host = self.host.clone();
        let info = self.info.clone();
        let builder_outputs = stream::once(async move {
            match host.load_builder(&info).await {
                Ok(Some(builder)) => {
                    tracing::debug!("loaded builder `{}`", info.builder_name);
                    let context = JobHandlerContext {
                        description,
                        scheduler,
                        inbound_bus: validated_rx.boxed(),
                        scope,
                    };
                    builder.handler().handle(argument, context)
                }
                Ok(None) => {
                    let info = serde_json::to_string_pretty(&info).unwrap_or_default();
                    stream::once(future::ready(Err(JobError::message(format!(
                        "Cannot load builder for builderInfo {}",
                        info
                    )))))
                    .boxed()
                }
                Err(e) => stream::once(future::ready(Err(JobError::from(e)))).boxed(),
            }
        })
        .flatten();

        let target = self.target.clone();
        let stamped = builder_outputs
            .map(move |item| item.map(|output| stamp_target(output, target.as_ref())))
            .boxed();

        merge_until_complete(stamped, validation_errors)
    }
}

/// Merge base options into an input and validate them, returning the input
/// with the validated options (defaults applied).
fn validate_input(value: Value, base_options: &JsonObject, validator: &dyn SchemaValidator) -> Result<Value, JobError> {
    let mut input: BuilderInput = serde_json::from_value(value)
        .map_err(|e| JobError::InvalidMessage(format!("invalid builder input: {}", e)))?;

    let merged = merge_options(base_options, Some(&input.options));
    match validator.validate(Value::Object(merged)).into_result()? {
        Value::Object(options) => input.options = options,
        other => {
            return Err(JobError::InvalidMessage(format!(
                "builder options must be an object, got {}",
                other
            )))
        }
    }

    serde_json::to_value(&input).map_err(|e| JobError::InvalidMessage(e.to_string()))
}

fn stamp_target(mut output: Value, target: Option<&Target>) -> Value {
    if let (Some(target), Value::Object(fields)) = (target, &mut output) {
        if let Ok(target) = serde_json::to_value(target) {
            fields.insert("target".to_string(), target);
        }
    }
    output
}
