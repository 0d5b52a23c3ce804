//! `kiln build` command

use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};

use crate::cli::BuildArgs;
use kiln::builder::CompilerStatus;
use kiln::ops::{compile, CompileOptions};
use kiln::util::GlobalContext;

pub fn execute(args: BuildArgs, ctx: &GlobalContext, verbose: bool) -> Result<()> {
    let opts = CompileOptions {
        poll_interval: Duration::from_millis(args.poll_interval),
    };
    let start = Instant::now();

    // Verbose runs print every log line, a spinner would only garble them.
    let spinner = if verbose {
        None
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]")?);
        pb.set_message("Compiling");
        Some(pb)
    };

    let report = compile(ctx, &opts, |status| {
        if let (Some(pb), CompilerStatus::Started) = (&spinner, status) {
            pb.tick();
        }
    })?;

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    if let Some(error) = report.error {
        bail!("{}", error);
    }

    let what = if report.invoked {
        "compiled"
    } else {
        "up to date"
    };
    eprintln!(
        "    Finished {} ({}) in {:.2}s",
        report.artifact.display(),
        what,
        start.elapsed().as_secs_f64()
    );

    Ok(())
}
