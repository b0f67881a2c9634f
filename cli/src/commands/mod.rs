//! CLI command definitions and dispatch.

mod cache;
mod inspect;
mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use transport_runtime::DiskBlobCache;

/// Moves component resources between OCI registries through a pipeline of stages.
#[derive(Parser)]
#[command(name = "component-transport", version, about)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Run a transport pipeline over the resources of a component
    Run(run::RunArgs),
    /// Show the component and resource sections of a processor message
    Inspect(inspect::InspectArgs),
    /// Manage the local blob cache
    Cache(cache::CacheArgs),
}

/// Cache directory: explicit, else the user cache directory.
pub(crate) fn cache_dir(dir: Option<PathBuf>) -> PathBuf {
    dir.unwrap_or_else(DiskBlobCache::default_dir)
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Run(args) => run::execute(args).await,
        Command::Inspect(args) => inspect::execute(args).await,
        Command::Cache(args) => cache::execute(args).await,
    }
}
