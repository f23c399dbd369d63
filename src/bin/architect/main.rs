//! Architect CLI - run workspace targets

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Returns whether the command succeeded.
fn run() -> Result<bool> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("architect=debug")
    } else {
        EnvFilter::new("architect=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    match cli.command {
        Commands::Run(args) => commands::run::execute(args, cli.workspace.as_deref(), cli.verbose),
        Commands::Targets(args) => commands::targets::execute(args, cli.workspace.as_deref()),
    }
}
