//! Implementation of `kiln clean`.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::builder::artifact::backup_path;
use crate::builder::orchestrator::{COMMAND_LINE_LOG, ERROR_LOG, INFO_LOG};
use crate::sources::archive::clean_old;
use crate::util::context::GlobalContext;
use crate::util::fs::{remove_file_if_exists, Removal};
use crate::util::log::LogQueue;

/// Options for the clean command.
#[derive(Debug, Clone, Default)]
pub struct CleanOptions {
    /// Also remove the artifact backup and the sidecar logs
    pub all: bool,
}

/// What a clean removed.
#[derive(Debug, Clone, Default)]
pub struct CleanReport {
    /// Extraction directories that were cleaned
    pub extractions: Vec<PathBuf>,
    /// Other files that were removed
    pub files: Vec<PathBuf>,
}

/// Remove previous package extractions and, optionally, run leftovers.
pub fn clean(ctx: &GlobalContext, opts: &CleanOptions) -> Result<CleanReport> {
    let config = ctx.load_config()?;
    let root = ctx.project_root();
    let settings = config.compile_settings(&root);

    let logs = LogQueue::new();
    let extractions = clean_old(&settings.layout.extract_dir, &logs.sender());
    logs.flush();

    let mut report = CleanReport {
        extractions: extractions?,
        files: Vec::new(),
    };

    if opts.all {
        let candidates = [
            backup_path(&settings.artifact),
            settings.logs_dir.join(COMMAND_LINE_LOG),
            settings.logs_dir.join(INFO_LOG),
            settings.logs_dir.join(ERROR_LOG),
        ];
        for path in candidates {
            let removal = remove_file_if_exists(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
            if removal == Removal::Removed {
                report.files.push(path);
            }
        }
    }

    Ok(report)
}
