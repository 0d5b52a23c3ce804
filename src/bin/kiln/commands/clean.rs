//! `kiln clean` command

use anyhow::Result;

use crate::cli::CleanArgs;
use kiln::ops::{clean, CleanOptions};
use kiln::util::GlobalContext;

pub fn execute(args: CleanArgs, ctx: &GlobalContext) -> Result<()> {
    let report = clean(ctx, &CleanOptions { all: args.all })?;

    for dir in &report.extractions {
        eprintln!("     Cleaned {}", dir.display());
    }
    for file in &report.files {
        eprintln!("     Removed {}", file.display());
    }
    if report.extractions.is_empty() && report.files.is_empty() {
        eprintln!("     Nothing to clean");
    }

    Ok(())
}
