//! `architect targets` command

use std::path::Path;

use anyhow::Result;

use architect::core::workspace::WorkspaceError;

use crate::cli::TargetsArgs;
use crate::commands::load_host;

pub fn execute(args: TargetsArgs, workspace: Option<&Path>) -> Result<bool> {
    let host = load_host(workspace)?;
    let definition = host.workspace();

    if let Some(project) = &args.project {
        if definition.project(project).is_none() {
            return Err(WorkspaceError::UnknownProject(project.clone()).into());
        }
    }

    for (name, project) in &definition.projects {
        if args.project.as_ref().is_some_and(|p| p != name) {
            continue;
        }
        for (target, target_def) in &project.targets {
            let configurations: Vec<&str> = target_def.configurations.keys().map(String::as_str).collect();
            if configurations.is_empty() {
                println!("{}:{}  ({})", name, target, target_def.builder);
            } else {
                println!(
                    "{}:{}  ({}) [{}]",
                    name,
                    target,
                    target_def.builder,
                    configurations.join(", ")
                );
            }
        }
    }

    Ok(true)
}
