//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Architect - run builders for workspace targets
#[derive(Parser)]
#[command(name = "architect")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the workspace file (searched upward from the current directory by default)
    #[arg(short, long, global = true, env = "ARCHITECT_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a target (`project:target[:configuration]`)
    Run(RunArgs),

    /// List the targets of the workspace
    Targets(TargetsArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Target to run
    pub target: String,

    /// Option override as `key=value`; values are parsed as JSON when possible
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
    pub options: Vec<String>,

    /// Print the builder output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct TargetsArgs {
    /// Only list targets of this project
    #[arg(long)]
    pub project: Option<String>,
}
