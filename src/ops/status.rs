//! Implementation of `kiln status`.
//!
//! Reports what a build would do without extracting packages or running the
//! compiler.

use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;

use crate::builder::artifact::backup_path;
use crate::builder::fingerprint::FingerprintStore;
use crate::builder::options::ArgumentSource;
use crate::builder::orchestrator::read_previous_command_line;
use crate::core::changes::{any_changed, diff, ChangeRecord};
use crate::core::module::{fingerprints, FingerprintSet, ModuleSource};
use crate::sources::package::PackageManager;
use crate::util::context::GlobalContext;
use crate::util::log::LogQueue;

/// State of the project relative to its last compile.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub project_root: PathBuf,
    /// Newest package archive, if any
    pub archive: Option<PathBuf>,
    /// Compiler a build would use, if already available
    pub compiler_dir: Option<PathBuf>,
    pub artifact: PathBuf,
    pub artifact_exists: bool,
    pub backup_exists: bool,
    pub modules: usize,
    pub changes: Vec<ChangeRecord>,
    /// `None` when no compiler is available to build the command line with
    pub arguments_changed: Option<bool>,
}

impl StatusReport {
    pub fn any_changed(&self) -> bool {
        any_changed(&self.changes)
    }

    /// Whether the next build would invoke the compiler.
    pub fn needs_compile(&self) -> bool {
        self.any_changed()
            || self.arguments_changed != Some(false)
            || !(self.artifact_exists || self.backup_exists)
    }
}

/// Compute the status of the project in `ctx`.
pub fn status(ctx: &GlobalContext) -> Result<StatusReport> {
    let config = ctx.load_config()?;
    let root = ctx.project_root();
    let settings = config.compile_settings(&root);

    let logs = LogQueue::new();
    let manager = PackageManager::new(settings.layout.clone(), logs.sender());
    let archive = manager.find_archive()?;
    let compiler_dir = manager.locate()?;

    let modules = config.module_source(&root).modules()?;
    let loaded = fingerprints(&modules);
    let cached = match &compiler_dir {
        Some(dir) => FingerprintStore::in_dir(dir).load()?,
        None => FingerprintSet::new(),
    };
    let changes = diff(&loaded, &cached);

    let arguments_changed = match &compiler_dir {
        Some(dir) => {
            let args = config.compiler_options(&root)?.arguments(&modules)?;
            let command = settings.command(&manager.tool_path(dir), &args);
            let previous = read_previous_command_line(&settings.command_line_log())?;
            Some(previous.as_deref() != Some(command.command_line_log().as_str()))
        }
        None => None,
    };
    logs.flush();

    Ok(StatusReport {
        project_root: root,
        archive,
        compiler_dir,
        artifact_exists: settings.artifact.is_file(),
        backup_exists: backup_path(&settings.artifact).is_file(),
        artifact: settings.artifact,
        modules: modules.len(),
        changes,
        arguments_changed,
    })
}
