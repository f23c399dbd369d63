//! Builders that ship with the runtime.
//!
//! - `true` always succeeds,
//! - `false` always fails,
//! - `concat` runs targets and builders one after another, stopping at the
//!   first failure,
//! - `allOf` runs them all at once and succeeds if every one succeeded.

use anyhow::Context as _;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::architect::api::ScheduleOptions;
use crate::builder::context::BuilderContext;
use crate::builder::create::{create_builder, Builder, BuilderOutputLike};
use crate::core::builder_types::{BuilderInfo, BuilderOutput};
use crate::core::options::JsonObject;
use crate::core::target::{target_from_target_string, Target};

/// Package name of the built-in builders.
pub const BUILTIN_PACKAGE: &str = "@architect/builtin";

/// Every built-in builder with its metadata.
pub fn builtin_builders() -> Vec<(BuilderInfo, Builder)> {
    vec![
        (
            info("true", "Always succeeds.", json!({"type": "object"})),
            true_builder(),
        ),
        (
            info("false", "Always fails.", json!({"type": "object"})),
            false_builder(),
        ),
        (
            info("concat", "Runs targets and builders in sequence.", composite_schema()),
            concat_builder(),
        ),
        (
            info("allOf", "Runs targets and builders in parallel.", composite_schema()),
            all_of_builder(),
        ),
    ]
}

fn info(name: &str, description: &str, schema: Value) -> BuilderInfo {
    BuilderInfo::new(format!("{}:{}", BUILTIN_PACKAGE, name), description, schema)
}

fn composite_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "targets": {"type": "array", "items": {"type": "string"}},
            "builders": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "builder": {"type": "string"},
                        "options": {"type": "object"}
                    },
                    "required": ["builder"]
                }
            }
        }
    })
}

pub fn true_builder() -> Builder {
    create_builder(|_options, _context| Ok(BuilderOutput::success().into()))
}

pub fn false_builder() -> Builder {
    create_builder(|_options, _context| Ok(BuilderOutput::error("False builder always errors.").into()))
}

#[derive(Debug, Default, Deserialize)]
struct CompositeOptions {
    #[serde(default)]
    targets: Vec<String>,
    #[serde(default)]
    builders: Vec<BuilderStep>,
}

#[derive(Debug, Deserialize)]
struct BuilderStep {
    builder: String,
    #[serde(default)]
    options: JsonObject,
}

enum Step {
    Target(Target),
    Builder(String, JsonObject),
}

impl Step {
    fn label(&self) -> String {
        match self {
            Step::Target(target) => target.to_string(),
            Step::Builder(name, _) => name.clone(),
        }
    }

    async fn run(self, context: &BuilderContext) -> anyhow::Result<BuilderOutput> {
        let run = match &self {
            Step::Target(target) => {
                context
                    .schedule_target(target, JsonObject::new(), ScheduleOptions::default())
                    .await?
            }
            Step::Builder(name, options) => {
                context
                    .schedule_builder(name, options.clone(), ScheduleOptions::default())
                    .await?
            }
        };
        let output = run.result().await;
        run.stop().await;
        Ok(output?)
    }
}

fn steps(options: JsonObject) -> anyhow::Result<Vec<Step>> {
    let options: CompositeOptions =
        serde_json::from_value(Value::Object(options)).context("invalid composite builder options")?;

    let mut steps = Vec::with_capacity(options.targets.len() + options.builders.len());
    for target in &options.targets {
        steps.push(Step::Target(target_from_target_string(target)?));
    }
    for step in options.builders {
        steps.push(Step::Builder(step.builder, step.options));
    }
    Ok(steps)
}

fn failed_step(label: &str, output: &BuilderOutput) -> BuilderOutput {
    match &output.error {
        Some(error) => BuilderOutput::error(format!("{} failed: {}", label, error)),
        None => BuilderOutput::error(format!("{} failed.", label)),
    }
}

pub fn concat_builder() -> Builder {
    create_builder(|options, context| {
        let steps = steps(options)?;
        Ok(BuilderOutputLike::future(async move {
            let total = steps.len() as u64;
            for (index, step) in steps.into_iter().enumerate() {
                let label = step.label();
                context.report_progress(index as u64, Some(total), Some(label.clone()));
                let output = step.run(&context).await?;
                if !output.success {
                    context.logger().error(format!("{} failed", label));
                    return Ok(failed_step(&label, &output));
                }
            }
            Ok(BuilderOutput::success())
        }))
    })
}

pub fn all_of_builder() -> Builder {
    create_builder(|options, context| {
        let steps = steps(options)?;
        Ok(BuilderOutputLike::future(async move {
            context.report_waiting(Some(format!("waiting on {} steps", steps.len())));
            let labels: Vec<String> = steps.iter().map(Step::label).collect();
            let outputs = join_all(steps.into_iter().map(|step| step.run(&context))).await;
            context.report_running();

            let mut failure = None;
            for (label, output) in labels.iter().zip(outputs) {
                let output = output?;
                if !output.success && failure.is_none() {
                    failure = Some(failed_step(label, &output));
                }
            }
            Ok(failure.unwrap_or_else(BuilderOutput::success))
        }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        let names: Vec<String> = builtin_builders()
            .into_iter()
            .map(|(info, _)| info.builder_name)
            .collect();
        assert_eq!(
            names,
            vec![
                "@architect/builtin:true",
                "@architect/builtin:false",
                "@architect/builtin:concat",
                "@architect/builtin:allOf",
            ]
        );
    }

    #[test]
    fn test_steps_keep_targets_before_builders() {
        let options = json!({
            "targets": ["app:build:prod"],
            "builders": [{"builder": "pkg:b"}]
        });
        let steps = steps(options.as_object().cloned().unwrap()).unwrap();
        let labels: Vec<String> = steps.iter().map(Step::label).collect();
        assert_eq!(labels, vec!["app:build:prod", "pkg:b"]);
    }

    #[test]
    fn test_steps_reject_bad_target_strings() {
        let options = json!({"targets": ["app"]});
        assert!(steps(options.as_object().cloned().unwrap()).is_err());
    }
}
