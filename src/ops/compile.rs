//! Implementation of `kiln build`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::builder::artifact::Finalized;
use crate::builder::orchestrator::{CompileOrchestrator, CompilerStatus};
use crate::core::changes::any_changed;
use crate::util::context::GlobalContext;

/// Options for the build command.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Delay between polls of the compile worker
    pub poll_interval: Duration,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Summary of a finished compile run.
#[derive(Debug, Clone)]
pub struct CompileReport {
    pub status: CompilerStatus,
    pub artifact: PathBuf,
    pub compiler_dir: Option<PathBuf>,
    /// Whether any module changed since the cached run
    pub changed: bool,
    /// Whether the compiler was invoked
    pub invoked: bool,
    pub finalized: Option<Finalized>,
    /// Failure message, including a hint when one is available
    pub error: Option<String>,
}

impl CompileReport {
    pub fn is_success(&self) -> bool {
        self.status == CompilerStatus::Completed
    }
}

/// Run the full compile lifecycle for the project in `ctx`.
///
/// `on_poll` is called between polls of the worker, on the calling thread.
pub fn compile(
    ctx: &GlobalContext,
    opts: &CompileOptions,
    mut on_poll: impl FnMut(CompilerStatus),
) -> Result<CompileReport> {
    let config = ctx.load_config()?;
    let root = ctx.project_root();

    let settings = config.compile_settings(&root);
    let artifact = settings.artifact.clone();
    let modules = Arc::new(config.module_source(&root));
    let arguments = Arc::new(config.compiler_options(&root)?);

    tracing::debug!("project root: {}", root.display());

    let mut orchestrator = CompileOrchestrator::new(settings, modules, arguments);
    orchestrator.init()?;

    let status = orchestrator.run_to_completion(|status| {
        on_poll(status);
        std::thread::sleep(opts.poll_interval);
    })?;

    let outcome = orchestrator.outcome();
    Ok(CompileReport {
        status,
        artifact,
        compiler_dir: outcome.map(|o| o.compiler.dir().to_path_buf()),
        changed: outcome.is_some_and(|o| any_changed(&o.changes)),
        invoked: outcome.is_some_and(|o| o.invoked),
        finalized: orchestrator.finalized(),
        error: orchestrator.error().map(|e| e.to_string()),
    })
}
