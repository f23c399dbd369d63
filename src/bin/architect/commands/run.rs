//! `architect run` command

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;

use crate::cli::RunArgs;
use crate::commands::load_host;
use architect::architect::WorkspaceArchitectHost;
use architect::core::{target_from_target_string, BuilderProgressState, JsonObject};
use architect::util::{LogLevel, Logger};
use architect::{Architect, ScheduleOptions};

pub fn execute(args: RunArgs, workspace: Option<&Path>, verbose: bool) -> Result<bool> {
    // Reject malformed targets before touching the workspace.
    target_from_target_string(&args.target)?;
    let host = load_host(workspace)?;

    let runtime = tokio::runtime::Runtime::new().context("failed to start the async runtime")?;
    runtime.block_on(run_target(args, Arc::new(host), verbose))
}

async fn run_target(args: RunArgs, host: Arc<WorkspaceArchitectHost>, verbose: bool) -> Result<bool> {
    let target = target_from_target_string(&args.target)?;
    let overrides = parse_overrides(&args.options)?;
    let architect = Architect::new(host);

    let pb = if verbose {
        None
    } else {
        let pb = ProgressBar::new(1);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .map_err(|e| anyhow!("invalid progress template: {}", e))?
                .progress_chars("#>-"),
        );
        Some(pb)
    };

    let logger = Logger::new("architect");
    let printer = pb.clone();
    let _printing = logger.subscribe_fn(move |entry| {
        if entry.level == LogLevel::Debug && !verbose {
            return;
        }
        let line = format!("{}: {}", entry.level, entry.message);
        match &printer {
            Some(pb) => pb.suspend(|| eprintln!("{}", line)),
            None => eprintln!("{}", line),
        }
    });

    let run = architect
        .schedule_target(&target, overrides, ScheduleOptions::with_logger(logger.clone()))
        .await?;

    if let Some(pb) = pb.clone() {
        let mut progress = run.progress();
        tokio::spawn(async move {
            while let Some(Ok(report)) = progress.next().await {
                if let Some(total) = report.total {
                    pb.set_length(total);
                }
                if let Some(current) = report.current {
                    pb.set_position(current);
                }
                match report.state {
                    BuilderProgressState::Running | BuilderProgressState::Waiting => {
                        pb.set_message(report.status.unwrap_or_default());
                    }
                    BuilderProgressState::Error => {
                        pb.set_message(report.error.unwrap_or_default());
                    }
                    BuilderProgressState::Stopped => {}
                }
            }
        });
    }

    let result = run.result().await;
    run.stop().await;
    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }

    let output = result?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if output.success {
        eprintln!("    Finished {}", target);
    } else {
        match &output.error {
            Some(error) => eprintln!("error: {} failed: {}", target, error),
            None => eprintln!("error: {} failed", target),
        }
    }
    Ok(output.success)
}

/// Parse `key=value` pairs. Values that are valid JSON keep their type,
/// anything else is a string.
fn parse_overrides(pairs: &[String]) -> Result<JsonObject> {
    let mut overrides = JsonObject::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid option `{}`, expected KEY=VALUE", pair))?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        overrides.insert(key.to_string(), value);
    }
    Ok(overrides)
}
