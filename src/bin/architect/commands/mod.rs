//! Command implementations.

pub mod run;
pub mod targets;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use architect::architect::{BuilderCatalog, WorkspaceArchitectHost};
use architect::core::find_workspace_file;

/// Load the workspace host, locating the workspace file if needed.
pub fn load_host(workspace: Option<&Path>) -> Result<WorkspaceArchitectHost> {
    let cwd = std::env::current_dir().context("failed to read the current directory")?;
    let path: PathBuf = match workspace {
        Some(path) => path.to_path_buf(),
        None => find_workspace_file(&cwd)?,
    };
    tracing::debug!("using workspace file {}", path.display());

    let host = WorkspaceArchitectHost::load(&path, BuilderCatalog::with_builtins())?;
    Ok(host.with_current_directory(cwd))
}
