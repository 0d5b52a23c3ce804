//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Kiln - incremental wrapper around an ahead-of-time compiler
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project config file to use instead of the nearest Kiln.toml
    #[arg(long, global = true, env = "KILN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile the modules if anything changed since the last run
    Build(BuildArgs),

    /// Show what the next build would do
    Status(StatusArgs),

    /// Remove old package extractions
    Clean(CleanArgs),
}

#[derive(Args)]
pub struct BuildArgs {
    /// Milliseconds between checks on the running compiler
    #[arg(long, default_value_t = 50)]
    pub poll_interval: u64,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Print the status as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct CleanArgs {
    /// Also remove the artifact backup and the compiler logs
    #[arg(long)]
    pub all: bool,
}
