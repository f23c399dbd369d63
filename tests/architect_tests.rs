//! End-to-end tests of the Architect facade against the in-memory host.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio::sync::Barrier;

use architect::architect::ProjectRef;
use architect::builder::builtin::{all_of_builder, concat_builder, false_builder, true_builder};
use architect::core::{target_from_target_string, target_string_from_target, BuilderInfo};
use architect::jobs::{create_job_handler, JobDescription, Registry, SimpleJobRegistry};
use architect::schema::CoreSchemaRegistry;
use architect::testing::TestingArchitectHost;
use architect::{
    create_builder, Architect, ArchitectError, ArchitectHost, Builder, BuilderOutput, BuilderOutputLike,
    BuilderProgressState, JsonObject, Logger, ScheduleOptions, Target,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn obj(value: Value) -> JsonObject {
    value.as_object().cloned().unwrap()
}

fn architect_for(host: TestingArchitectHost) -> Architect {
    Architect::new(Arc::new(host))
}

/// Outputs the options it received.
fn echo_options() -> Builder {
    create_builder(|options, _context| {
        Ok(BuilderOutput::success()
            .with_field("options", Value::Object(options))
            .into())
    })
}

// ============================================================================
// Parallelism
// ============================================================================

#[tokio::test]
async fn test_targets_run_in_parallel() {
    const RUNS: usize = 3;
    let barrier = Arc::new(Barrier::new(RUNS));
    let host = TestingArchitectHost::new();
    host.add_builder(
        "pkg:rendezvous",
        create_builder(move |_options, _context| {
            let barrier = barrier.clone();
            Ok(BuilderOutputLike::future(async move {
                barrier.wait().await;
                Ok(BuilderOutput::success())
            }))
        }),
        "",
        json!({"type": "object"}),
    );
    for i in 0..RUNS {
        host.add_target(Target::new("app", format!("t{}", i)), "pkg:rendezvous", JsonObject::new());
    }
    let architect = architect_for(host);

    let mut runs = Vec::new();
    for i in 0..RUNS {
        let target = Target::new("app", format!("t{}", i));
        runs.push(
            architect
                .schedule_target(&target, JsonObject::new(), ScheduleOptions::default())
                .await
                .unwrap(),
        );
    }

    // Every run waits for all the others; this only finishes if they overlap.
    for run in runs {
        let output = tokio::time::timeout(TIMEOUT, run.result()).await.unwrap().unwrap();
        assert!(output.success);
    }
}

#[tokio::test]
async fn test_same_builder_scheduled_twice_runs_twice() {
    let host = TestingArchitectHost::new();
    host.add_builder("pkg:echo", echo_options(), "", json!({"type": "object"}));
    let architect = architect_for(host);

    let first = architect
        .schedule_builder("pkg:echo", obj(json!({"n": 1})), ScheduleOptions::default())
        .await
        .unwrap();
    let second = architect
        .schedule_builder("pkg:echo", obj(json!({"n": 2})), ScheduleOptions::default())
        .await
        .unwrap();

    assert_ne!(first.id(), second.id());
    assert_eq!(first.result().await.unwrap().extra["options"]["n"], 1);
    assert_eq!(second.result().await.unwrap().extra["options"]["n"], 2);
}

// ============================================================================
// Option merging
// ============================================================================

#[tokio::test]
async fn test_overrides_merge_over_target_options() {
    let host = TestingArchitectHost::new();
    host.add_builder("pkg:echo", echo_options(), "", json!({"type": "object"}));
    host.add_target(
        Target::new("app", "build"),
        "pkg:echo",
        obj(json!({
            "onlyBase": true,
            "a": "base",
            "obj": {"nested": {"fromBase": true}, "kept": 1, "replaced": 1}
        })),
    );
    let architect = architect_for(host);

    let run = architect
        .schedule_target(
            &Target::new("app", "build"),
            obj(json!({"a": "override", "obj": {"nested": {"fromOverride": true}, "replaced": 2}})),
            ScheduleOptions::default(),
        )
        .await
        .unwrap();

    let output = run.result().await.unwrap();
    assert_eq!(
        output.extra["options"],
        json!({
            "onlyBase": true,
            "a": "override",
            "obj": {"nested": {"fromOverride": true}, "kept": 1, "replaced": 2}
        })
    );
    assert_eq!(output.target, Some(Target::new("app", "build")));
    assert_eq!(output.info.unwrap().builder_name, "pkg:echo");
}

// ============================================================================
// Target strings
// ============================================================================

#[test]
fn test_target_string_round_trip() {
    for s in ["app:build", "app:build:production", "app:build:production,es5"] {
        let target = target_from_target_string(s).unwrap();
        assert_eq!(target_string_from_target(&target), s);
    }

    let empty = target_from_target_string("app:build:").unwrap();
    assert_eq!(empty.configuration.as_deref(), Some(""));
    assert_eq!(target_string_from_target(&empty), "app:build:");

    assert!(target_from_target_string("app").is_err());
}

// ============================================================================
// Output shapes
// ============================================================================

#[tokio::test]
async fn test_output_shapes_are_equivalent() {
    let host = TestingArchitectHost::new();
    host.add_builder(
        "pkg:value",
        create_builder(|_, _| Ok(BuilderOutput::success().with_field("v", 1).into())),
        "",
        json!(true),
    );
    host.add_builder(
        "pkg:future",
        create_builder(|_, _| {
            Ok(BuilderOutputLike::future(async {
                tokio::task::yield_now().await;
                Ok(BuilderOutput::success().with_field("v", 1))
            }))
        }),
        "",
        json!(true),
    );
    host.add_builder(
        "pkg:stream",
        create_builder(|_, _| {
            Ok(BuilderOutputLike::stream(stream::iter(vec![Ok(
                BuilderOutput::success().with_field("v", 1),
            )])))
        }),
        "",
        json!(true),
    );
    let architect = architect_for(host);

    for name in ["pkg:value", "pkg:future", "pkg:stream"] {
        let run = architect
            .schedule_builder(name, JsonObject::new(), ScheduleOptions::default())
            .await
            .unwrap();
        let outputs: Vec<BuilderOutput> = run.output().map(Result::unwrap).collect().await;
        assert_eq!(outputs.len(), 1, "{}", name);
        assert!(outputs[0].success);
        assert_eq!(outputs[0].extra["v"], 1);
    }
}

#[tokio::test]
async fn test_empty_stream_defaults_to_failure() {
    let host = TestingArchitectHost::new();
    host.add_builder(
        "pkg:empty",
        create_builder(|_, _| Ok(BuilderOutputLike::stream(stream::empty()))),
        "",
        json!(true),
    );
    let architect = architect_for(host);

    let run = architect
        .schedule_builder("pkg:empty", JsonObject::new(), ScheduleOptions::default())
        .await
        .unwrap();
    let output = run.result().await.unwrap();
    assert!(!output.success);
}

#[tokio::test]
async fn test_builder_errors_fail_the_run() {
    let host = TestingArchitectHost::new();
    host.add_builder(
        "pkg:throws",
        create_builder(|_, _| Err(anyhow::anyhow!("thrown synchronously"))),
        "",
        json!(true),
    );
    host.add_builder(
        "pkg:rejects",
        create_builder(|_, _| Ok(BuilderOutputLike::future(async { Err(anyhow::anyhow!("rejected")) }))),
        "",
        json!(true),
    );
    let architect = architect_for(host);

    let run = architect
        .schedule_builder("pkg:throws", JsonObject::new(), ScheduleOptions::default())
        .await
        .unwrap();
    assert_eq!(run.result().await.unwrap_err().to_string(), "thrown synchronously");

    let run = architect
        .schedule_builder("pkg:rejects", JsonObject::new(), ScheduleOptions::default())
        .await
        .unwrap();
    let mut progress = run.progress();
    assert_eq!(run.result().await.unwrap_err().to_string(), "rejected");

    let mut saw_error = false;
    while let Some(Ok(report)) = progress.next().await {
        if report.state == BuilderProgressState::Error {
            assert_eq!(report.error.as_deref(), Some("rejected"));
            saw_error = true;
        }
    }
    assert!(saw_error);
}

// ============================================================================
// Validation
// ============================================================================

fn p1_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "p0": {"type": "number", "default": 123},
            "p1": {"type": "string"}
        },
        "required": ["p1"]
    })
}

#[tokio::test]
async fn test_invalid_options_error_names_the_field() {
    let host = TestingArchitectHost::new();
    host.add_builder("pkg:strict", echo_options(), "", p1_schema());
    let architect = architect_for(host);

    let run = architect
        .schedule_builder("pkg:strict", JsonObject::new(), ScheduleOptions::default())
        .await
        .unwrap();
    let err = tokio::time::timeout(TIMEOUT, run.result()).await.unwrap().unwrap_err();
    assert!(err.is_validation());
    assert!(err.to_string().contains("p1"), "{}", err);
}

#[tokio::test]
async fn test_valid_options_get_defaults() {
    let host = TestingArchitectHost::new();
    host.add_builder("pkg:strict", echo_options(), "", p1_schema());
    let architect = architect_for(host);

    let run = architect
        .schedule_builder("pkg:strict", obj(json!({"p1": "hello"})), ScheduleOptions::default())
        .await
        .unwrap();
    let output = run.result().await.unwrap();
    assert_eq!(output.extra["options"], json!({"p0": 123, "p1": "hello"}));
}

#[tokio::test]
async fn test_validate_options_from_context() {
    let host = TestingArchitectHost::new();
    host.add_builder("pkg:strict", echo_options(), "", p1_schema());
    host.add_builder(
        "pkg:checker",
        create_builder(|options, context| {
            Ok(BuilderOutputLike::future(async move {
                let validated = context.validate_options(options, "pkg:strict").await?;
                Ok(BuilderOutput::success().with_field("validated", Value::Object(validated)))
            }))
        }),
        "",
        json!(true),
    );
    let architect = architect_for(host);

    let run = architect
        .schedule_builder("pkg:checker", obj(json!({"p1": "hello"})), ScheduleOptions::default())
        .await
        .unwrap();
    let output = run.result().await.unwrap();
    assert_eq!(output.extra["validated"], json!({"p0": 123, "p1": "hello"}));

    let run = architect
        .schedule_builder("pkg:checker", JsonObject::new(), ScheduleOptions::default())
        .await
        .unwrap();
    let err = run.result().await.unwrap_err();
    assert!(err.to_string().contains("p1"));
}

// ============================================================================
// Logging
// ============================================================================

#[tokio::test]
async fn test_every_log_entry_arrives_before_the_output() {
    const ENTRIES: usize = 100;
    let host = TestingArchitectHost::new();
    host.add_builder(
        "pkg:chatty",
        create_builder(|_, context| {
            for i in 0..ENTRIES {
                context.logger().info(i.to_string());
            }
            Ok(BuilderOutput::success().into())
        }),
        "",
        json!(true),
    );
    host.add_target(Target::new("app", "chatty"), "pkg:chatty", JsonObject::new());
    let architect = architect_for(host);

    let logger = Logger::new("test");
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();
    let _subscription = logger.subscribe_fn(move |entry| sink.lock().unwrap().push(entry.clone()));

    let run = architect
        .schedule_target(
            &Target::new("app", "chatty"),
            JsonObject::new(),
            ScheduleOptions::with_logger(logger),
        )
        .await
        .unwrap();
    assert!(run.result().await.unwrap().success);

    let entries = messages.lock().unwrap().clone();
    let texts: Vec<String> = entries.iter().map(|e| e.message.clone()).collect();
    let expected: Vec<String> = (0..ENTRIES).map(|i| i.to_string()).collect();
    assert_eq!(texts, expected);
    assert_eq!(entries[0].name, "pkg:chatty");
}

// ============================================================================
// Watch mode
// ============================================================================

#[tokio::test]
async fn test_streaming_builder_emits_every_rebuild() {
    const BUILDS: u64 = 10;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let host = TestingArchitectHost::new();
    host.add_builder(
        "pkg:watch",
        create_builder(move |_, context| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(BuilderOutputLike::stream(stream::iter(0..BUILDS).then(move |i| {
                let context = context.clone();
                async move {
                    context.report_running();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(BuilderOutput::success().with_field("build", i))
                }
            })))
        }),
        "",
        json!(true),
    );
    let architect = architect_for(host);

    let run = architect
        .schedule_builder("pkg:watch", JsonObject::new(), ScheduleOptions::default())
        .await
        .unwrap();
    let progress = run.progress();

    // The first rebuild resolves the result while the builder keeps watching.
    let first = run.result().await.unwrap();
    assert_eq!(first.extra["build"], 0);
    assert!(!run.job().state().is_terminal());

    let builds: Vec<Value> = run
        .output()
        .map(|output| output.unwrap().extra["build"].clone())
        .collect()
        .await;
    let expected: Vec<Value> = (0..BUILDS).map(|i| json!(i)).collect();
    assert_eq!(builds, expected);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let reports: Vec<_> = progress.map(|r| r.unwrap()).collect().await;
    assert_eq!(reports.first().map(|r| r.state), Some(BuilderProgressState::Running));
    assert_eq!(reports.last().map(|r| r.state), Some(BuilderProgressState::Stopped));
    let stopped = reports.iter().filter(|r| r.state == BuilderProgressState::Stopped).count();
    assert_eq!(stopped, BUILDS as usize);
    let restarts = reports
        .iter()
        .filter(|r| r.state == BuilderProgressState::Running && r.current == Some(0))
        .count();
    assert_eq!(restarts, BUILDS as usize);
}

#[tokio::test]
async fn test_stop_runs_teardown_once() {
    let teardowns = Arc::new(AtomicUsize::new(0));
    let counter = teardowns.clone();
    let host = TestingArchitectHost::new();
    host.add_builder(
        "pkg:forever",
        create_builder(move |_, context| {
            let counter = counter.clone();
            context.add_teardown(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            Ok(BuilderOutputLike::stream(stream::pending()))
        }),
        "",
        json!(true),
    );
    let architect = architect_for(host);

    let run = architect
        .schedule_builder("pkg:forever", JsonObject::new(), ScheduleOptions::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    run.stop().await;
    run.stop().await;
    assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    assert!(run.output().collect::<Vec<_>>().await.is_empty());
}

// ============================================================================
// Resolution errors
// ============================================================================

#[tokio::test]
async fn test_unknown_builder() {
    let architect = architect_for(TestingArchitectHost::new());
    let err = architect
        .schedule_builder("pkg:nope", JsonObject::new(), ScheduleOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Job name \"pkg:nope\" does not exist.");
}

#[tokio::test]
async fn test_invalid_builder_name() {
    let architect = architect_for(TestingArchitectHost::new());
    let err = architect
        .schedule_builder("no-colon", JsonObject::new(), ScheduleOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ArchitectError::InvalidBuilderName(_)));
}

#[tokio::test]
async fn test_builder_without_implementation() {
    let host = TestingArchitectHost::new();
    host.add_builder_info(BuilderInfo::new("pkg:ghost", "", json!(true)));
    let architect = architect_for(host);

    let run = architect
        .schedule_builder("pkg:ghost", JsonObject::new(), ScheduleOptions::default())
        .await
        .unwrap();
    let err = run.result().await.unwrap_err();
    assert!(err.to_string().starts_with("Cannot load builder for builderInfo"));
}

/// Delegates to a testing host but cannot resolve builders.
struct OfflineHost(TestingArchitectHost);

#[async_trait]
impl ArchitectHost for OfflineHost {
    async fn get_builder_name_for_target(&self, target: &Target) -> anyhow::Result<Option<String>> {
        self.0.get_builder_name_for_target(target).await
    }

    async fn resolve_builder(&self, _builder_name: &str) -> anyhow::Result<Option<BuilderInfo>> {
        anyhow::bail!("builder registry offline")
    }

    async fn load_builder(&self, info: &BuilderInfo) -> anyhow::Result<Option<Builder>> {
        self.0.load_builder(info).await
    }

    async fn get_current_directory(&self) -> anyhow::Result<String> {
        self.0.get_current_directory().await
    }

    async fn get_workspace_root(&self) -> anyhow::Result<String> {
        self.0.get_workspace_root().await
    }

    async fn get_options_for_target(&self, target: &Target) -> anyhow::Result<Option<JsonObject>> {
        self.0.get_options_for_target(target).await
    }

    async fn get_project_metadata(&self, project: &ProjectRef) -> anyhow::Result<Option<JsonObject>> {
        self.0.get_project_metadata(project).await
    }
}

#[tokio::test]
async fn test_host_errors_propagate_unchanged() {
    let architect = Architect::new(Arc::new(OfflineHost(TestingArchitectHost::new())));
    let err = architect
        .schedule_builder("pkg:any", JsonObject::new(), ScheduleOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "builder registry offline");
}

#[tokio::test]
async fn test_additional_registry_is_consulted_last() {
    let extra = SimpleJobRegistry::new();
    extra
        .register(
            "custom",
            create_job_handler(JobDescription::new(""), |_, _| async { Ok(json!("custom")) }),
        )
        .unwrap();
    let extra: Arc<dyn Registry> = Arc::new(extra);
    let architect = Architect::with_registries(
        Arc::new(TestingArchitectHost::new()),
        Arc::new(CoreSchemaRegistry::new()),
        Some(extra),
    );

    assert!(architect.has("custom").await.unwrap());
    assert!(!architect.has("missing").await.unwrap());
    let output = architect
        .scheduler()
        .schedule("custom", Value::Null)
        .output()
        .next()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(output, json!("custom"));
}

// ============================================================================
// Nested scheduling
// ============================================================================

#[tokio::test]
async fn test_nested_progress_reaches_the_parent() {
    let host = TestingArchitectHost::new();
    host.add_builder("pkg:true", true_builder(), "", json!({"type": "object"}));
    host.add_builder(
        "pkg:parent",
        create_builder(|_, context| {
            Ok(BuilderOutputLike::future(async move {
                let child = context
                    .schedule_target(&Target::new("app", "child"), JsonObject::new(), ScheduleOptions::default())
                    .await?;
                let output = child.result().await?;
                Ok(BuilderOutput::success().with_field("childSucceeded", output.success))
            }))
        }),
        "",
        json!(true),
    );
    host.add_target(Target::new("app", "child"), "pkg:true", JsonObject::new());
    host.add_target(Target::new("app", "parent"), "pkg:parent", JsonObject::new());
    let architect = architect_for(host);

    let run = architect
        .schedule_target(&Target::new("app", "parent"), JsonObject::new(), ScheduleOptions::default())
        .await
        .unwrap();
    let progress = run.progress();

    let output = run.result().await.unwrap();
    assert_eq!(output.extra["childSucceeded"], true);

    let builders: Vec<String> = progress
        .map(|report| report.unwrap().builder.builder_name)
        .collect()
        .await;
    assert!(builders.iter().any(|b| b == "pkg:true"));
    assert!(builders.iter().any(|b| b == "pkg:parent"));
}

#[tokio::test]
async fn test_scheduling_an_ancestor_is_a_cycle() {
    let host = TestingArchitectHost::new();
    host.add_builder(
        "pkg:recurse",
        create_builder(|_, context| {
            Ok(BuilderOutputLike::future(async move {
                let Some(target) = context.target.clone() else {
                    return Ok(BuilderOutput::error("no target"));
                };
                match context
                    .schedule_target(&target, JsonObject::new(), ScheduleOptions::default())
                    .await
                {
                    Ok(_) => Ok(BuilderOutput::success()),
                    Err(err) => Ok(BuilderOutput::error(err.to_string())),
                }
            }))
        }),
        "",
        json!(true),
    );
    host.add_target(Target::new("app", "loop"), "pkg:recurse", JsonObject::new());
    let architect = architect_for(host);

    let run = architect
        .schedule_target(&Target::new("app", "loop"), JsonObject::new(), ScheduleOptions::default())
        .await
        .unwrap();
    let output = tokio::time::timeout(TIMEOUT, run.result()).await.unwrap().unwrap();
    assert!(!output.success);
    assert!(output.error.unwrap().contains("app:loop -> app:loop"));
}

#[tokio::test]
async fn test_context_queries_the_workspace() {
    let host = TestingArchitectHost::new();
    host.add_builder("pkg:true", true_builder(), "", json!({"type": "object"}));
    host.add_target(Target::new("lib", "build"), "pkg:true", obj(json!({"outDir": "dist"})));
    host.add_project_metadata("lib", obj(json!({"root": "libs/lib"})));
    host.add_builder(
        "pkg:inspect",
        create_builder(|_, context| {
            Ok(BuilderOutputLike::future(async move {
                let target = Target::new("lib", "build");
                let options = context.get_target_options(&target).await?;
                let builder = context.get_builder_name_for_target(&target).await?;
                let metadata = context.get_project_metadata("lib").await?;
                Ok(BuilderOutput::success()
                    .with_field("options", Value::Object(options))
                    .with_field("builder", builder)
                    .with_field("root", metadata["root"].clone()))
            }))
        }),
        "",
        json!(true),
    );
    let architect = architect_for(host);

    let run = architect
        .schedule_builder("pkg:inspect", JsonObject::new(), ScheduleOptions::default())
        .await
        .unwrap();
    let output = run.result().await.unwrap();
    assert_eq!(output.extra["options"], json!({"outDir": "dist"}));
    assert_eq!(output.extra["builder"], "pkg:true");
    assert_eq!(output.extra["root"], "libs/lib");
}

#[tokio::test]
async fn test_concat_stops_at_first_failure() {
    let host = TestingArchitectHost::new();
    host.add_builder("pkg:true", true_builder(), "", json!({"type": "object"}));
    host.add_builder("pkg:false", false_builder(), "", json!({"type": "object"}));
    host.add_builder("pkg:concat", concat_builder(), "", json!({"type": "object"}));
    host.add_target(Target::new("app", "ok"), "pkg:true", JsonObject::new());
    host.add_target(Target::new("app", "bad"), "pkg:false", JsonObject::new());
    let architect = architect_for(host);

    let run = architect
        .schedule_builder(
            "pkg:concat",
            obj(json!({"targets": ["app:ok", "app:bad", "app:ok"]})),
            ScheduleOptions::default(),
        )
        .await
        .unwrap();
    let output = run.result().await.unwrap();
    assert!(!output.success);
    assert_eq!(
        output.error.as_deref(),
        Some("app:bad failed: False builder always errors.")
    );
}

#[tokio::test]
async fn test_all_of_waits_on_its_steps() {
    let host = TestingArchitectHost::new();
    host.add_builder("pkg:true", true_builder(), "", json!({"type": "object"}));
    host.add_builder("pkg:all", all_of_builder(), "", json!({"type": "object"}));
    host.add_target(Target::new("app", "a"), "pkg:true", JsonObject::new());
    host.add_target(Target::new("app", "b"), "pkg:true", JsonObject::new());
    let architect = architect_for(host);

    let run = architect
        .schedule_builder(
            "pkg:all",
            obj(json!({"targets": ["app:a", "app:b"]})),
            ScheduleOptions::default(),
        )
        .await
        .unwrap();
    let progress = run.progress();
    assert!(run.result().await.unwrap().success);

    let own: Vec<_> = progress
        .map(|r| r.unwrap())
        .filter(|r| futures::future::ready(r.builder.builder_name == "pkg:all"))
        .collect()
        .await;
    let waiting = own
        .iter()
        .find(|r| r.state == BuilderProgressState::Waiting)
        .unwrap();
    assert_eq!(waiting.status.as_deref(), Some("waiting on 2 steps"));
    assert_eq!(own.last().map(|r| r.state), Some(BuilderProgressState::Stopped));
}
