//! Kiln CLI - incremental wrapper around an ahead-of-time compiler

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use kiln::util::GlobalContext;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    // Parse CLI
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("kiln=debug")
    } else {
        EnvFilter::new("kiln=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let mut ctx = GlobalContext::new()?;
    if let Some(config) = cli.config {
        ctx = ctx.with_config(config);
    }

    // Execute command
    match cli.command {
        Commands::Build(args) => commands::build::execute(args, &ctx, cli.verbose),
        Commands::Status(args) => commands::status::execute(args, &ctx),
        Commands::Clean(args) => commands::clean::execute(args, &ctx),
    }
}
