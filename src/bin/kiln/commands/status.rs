//! `kiln status` command

use anyhow::Result;
use serde::Serialize;

use crate::cli::StatusArgs;
use kiln::core::changes::format_report;
use kiln::ops::{status, StatusReport};
use kiln::util::GlobalContext;

#[derive(Serialize)]
struct JsonStatus<'a> {
    #[serde(flatten)]
    report: &'a StatusReport,
    needs_compile: bool,
}

pub fn execute(args: StatusArgs, ctx: &GlobalContext) -> Result<()> {
    let report = status(ctx)?;

    if args.json {
        let json = JsonStatus {
            report: &report,
            needs_compile: report.needs_compile(),
        };
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    println!("     Project {}", report.project_root.display());
    match &report.archive {
        Some(archive) => println!("     Archive {}", archive.display()),
        None => println!("     Archive (none)"),
    }
    match &report.compiler_dir {
        Some(dir) => println!("    Compiler {}", dir.display()),
        None => println!("    Compiler (not extracted)"),
    }
    let state = match (report.artifact_exists, report.backup_exists) {
        (true, _) => "present",
        (false, true) => "backup only",
        (false, false) => "missing",
    };
    println!("    Artifact {} ({})", report.artifact.display(), state);
    println!("     Modules {}", report.modules);

    if !report.changes.is_empty() {
        print!("{}", format_report(&report.changes));
    }

    if report.arguments_changed == Some(true) {
        println!("   Arguments changed since the last build");
    }
    if report.needs_compile() {
        println!("      Status needs compile");
    } else {
        println!("      Status up to date");
    }

    Ok(())
}
