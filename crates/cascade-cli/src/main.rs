mod inspect;
mod run;
mod validate;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cascade", version, about = "Cascade workflow orchestration engine")]
struct Cli {
    /// Path to cascade.toml; defaults are used when absent.
    #[arg(long, global = true, default_value = "cascade.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Statically validate a workflow definition file.
    Validate {
        /// Workflow definition (JSON).
        workflow: PathBuf,
    },
    /// Execute a workflow against a local program directory.
    Run(run::RunArgs),
    /// Show topological order, waves, and dependencies of a workflow.
    Inspect {
        /// Workflow definition (JSON).
        workflow: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    cascade_core::init_tracing();

    let cli = Cli::parse();
    let config = cascade_core::config::load_config(&cli.config)?;

    match cli.command {
        Command::Validate { workflow } => validate::validate(&workflow),
        Command::Run(args) => run::run(config, args).await,
        Command::Inspect { workflow } => inspect::inspect(&workflow),
    }
}
