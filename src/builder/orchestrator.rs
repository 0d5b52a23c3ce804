//! Compile orchestration.
//!
//! A [`CompileOrchestrator`] runs the compiler at most once per lifetime. The
//! slow part (package resolution, fingerprinting, the compiler process) runs
//! on a worker thread; the owner polls [`CompileOrchestrator::run_once`]
//! without blocking until the run reaches a terminal state. Log lines from
//! the worker are queued and emitted by the polling thread.
//!
//! The run protocol:
//! 1. resolve the compiler package
//! 2. diff live module fingerprints against the cache next to the compiler
//! 3. build the argument vector and compare it with the previous run's
//! 4. skip when nothing changed, the argument vector is identical and the
//!    previous artifact is available as a backup
//! 5. otherwise run the compiler and, on success only, update the cache
//!
//! Whatever happened, the artifact backup is finalized exactly once.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use crate::builder::artifact::{ArtifactBackup, Finalized};
use crate::builder::errors::CompileError;
use crate::builder::fingerprint::FingerprintStore;
use crate::builder::options::ArgumentSource;
use crate::core::changes::{any_changed, diff, format_report, ChangeRecord};
use crate::core::module::{fingerprints, ModuleSource};
use crate::sources::package::{CompilerLocation, PackageLayout, PackageManager};
use crate::util::fs::write_string;
use crate::util::log::{LogQueue, LogSender};
use crate::util::process::{find_executable, run_captured, CaptureLogs, ProcessBuilder};

/// Sidecar log holding the last command line; doubles as the persisted argument vector.
pub const COMMAND_LINE_LOG: &str = "command_line.log";
/// Sidecar log of the compiler's standard output.
pub const INFO_LOG: &str = "info.log";
/// Sidecar log of the compiler's standard error.
pub const ERROR_LOG: &str = "error.log";

const MONO_DOWNLOAD_URL: &str = "https://www.mono-project.com/download/stable/#download-";

/// State of the compile run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompilerStatus {
    NotStarted,
    Started,
    Completed,
    Error,
}

impl CompilerStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CompilerStatus::Completed | CompilerStatus::Error)
    }
}

/// Fixed inputs of a compile run.
#[derive(Debug, Clone)]
pub struct CompileSettings {
    /// Working directory of the compiler.
    pub root: PathBuf,
    pub layout: PackageLayout,
    /// File the compiler must produce.
    pub artifact: PathBuf,
    /// Directory for the sidecar logs.
    pub logs_dir: PathBuf,
    /// Interpreter used to launch the compiler, if any.
    pub runtime: Option<String>,
}

impl CompileSettings {
    pub fn command_line_log(&self) -> PathBuf {
        self.logs_dir.join(COMMAND_LINE_LOG)
    }

    pub fn capture_logs(&self) -> CaptureLogs {
        CaptureLogs {
            stdout: Some(self.logs_dir.join(INFO_LOG)),
            stderr: Some(self.logs_dir.join(ERROR_LOG)),
        }
    }

    /// The command that runs the compiler at `tool` with `args`.
    pub fn command(&self, tool: &Path, args: &[String]) -> ProcessBuilder {
        let command = match &self.runtime {
            Some(runtime) => ProcessBuilder::new(runtime).arg(tool),
            None => ProcessBuilder::new(tool),
        };
        command.args(args).cwd(&self.root)
    }

    /// Suggestion shown when the compiler could not be started.
    ///
    /// Only given when an interpreter is needed and it is not on `PATH`.
    pub fn launch_hint(&self) -> Option<String> {
        let needs_mono = !cfg!(windows)
            && self
                .layout
                .tool
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("exe"));

        let runtime = match &self.runtime {
            Some(runtime) => runtime.as_str(),
            None if needs_mono => "mono",
            None => return None,
        };

        if find_executable(runtime).is_some() {
            return None;
        }

        let platform = if cfg!(windows) {
            "win"
        } else if cfg!(target_os = "macos") {
            "mac"
        } else {
            "lin"
        };
        Some(format!(
            "`{}` was not found in PATH. Are you missing a mono installation? {}{}",
            runtime, MONO_DOWNLOAD_URL, platform
        ))
    }
}

/// Result of a worker run that did not fail.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub compiler: CompilerLocation,
    pub changes: Vec<ChangeRecord>,
    /// Whether the compiler was actually invoked.
    pub invoked: bool,
}

type Worker = JoinHandle<Result<RunOutcome, CompileError>>;

/// Drives a single compile run through its states.
pub struct CompileOrchestrator {
    settings: Arc<CompileSettings>,
    modules: Arc<dyn ModuleSource>,
    arguments: Arc<dyn ArgumentSource>,
    status: CompilerStatus,
    backup: Option<ArtifactBackup>,
    worker: Option<Worker>,
    logs: LogQueue,
    outcome: Option<RunOutcome>,
    error: Option<CompileError>,
    finalized: Option<Finalized>,
}

impl CompileOrchestrator {
    pub fn new(
        settings: CompileSettings,
        modules: Arc<dyn ModuleSource>,
        arguments: Arc<dyn ArgumentSource>,
    ) -> Self {
        CompileOrchestrator {
            settings: Arc::new(settings),
            modules,
            arguments,
            status: CompilerStatus::NotStarted,
            backup: None,
            worker: None,
            logs: LogQueue::new(),
            outcome: None,
            error: None,
            finalized: None,
        }
    }

    pub fn settings(&self) -> &CompileSettings {
        &self.settings
    }

    pub fn status(&self) -> CompilerStatus {
        self.status
    }

    /// The successful run, once completed.
    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    /// Why the run failed, once in the `Error` state.
    pub fn error(&self) -> Option<&CompileError> {
        self.error.as_ref()
    }

    /// What happened to the artifact backup, once finalized.
    pub fn finalized(&self) -> Option<Finalized> {
        self.finalized
    }

    /// Move the previous artifact aside. Does nothing after the first call.
    pub fn init(&mut self) -> Result<()> {
        if self.backup.is_none() && self.finalized.is_none() {
            self.backup = Some(ArtifactBackup::prepare(&self.settings.artifact)?);
        }
        Ok(())
    }

    /// Start the worker. Calling it again after the first start does nothing.
    pub fn start(&mut self) -> Result<()> {
        if self.status != CompilerStatus::NotStarted {
            return Ok(());
        }
        self.init()?;

        let settings = Arc::clone(&self.settings);
        let modules = Arc::clone(&self.modules);
        let arguments = Arc::clone(&self.arguments);
        let backup = self
            .backup
            .as_ref()
            .and_then(|b| b.backup().map(Path::to_path_buf));
        let log = self.logs.sender();

        let worker = std::thread::Builder::new()
            .name("kiln-compile".to_string())
            .spawn(move || {
                let run = CompileRun {
                    settings: &settings,
                    modules: modules.as_ref(),
                    arguments: arguments.as_ref(),
                    backup: backup.as_deref(),
                    log: &log,
                };
                run.execute()
            })
            .context("failed to spawn compile worker")?;

        self.worker = Some(worker);
        self.status = CompilerStatus::Started;
        Ok(())
    }

    /// Advance the run without blocking and return the current state.
    ///
    /// Starts the worker on the first call. Afterwards, emits queued log
    /// lines and, once the worker has finished, records its result and
    /// finalizes the artifact backup.
    pub fn run_once(&mut self) -> Result<CompilerStatus> {
        match self.status {
            CompilerStatus::NotStarted => self.start()?,
            CompilerStatus::Started => self.poll()?,
            CompilerStatus::Completed | CompilerStatus::Error => {}
        }
        Ok(self.status)
    }

    /// Poll until the run is terminal, calling `idle` between polls.
    pub fn run_to_completion(
        &mut self,
        mut idle: impl FnMut(CompilerStatus),
    ) -> Result<CompilerStatus> {
        loop {
            let status = self.run_once()?;
            if status.is_terminal() {
                return Ok(status);
            }
            idle(status);
        }
    }

    fn poll(&mut self) -> Result<()> {
        self.logs.flush();

        if !self.worker.as_ref().is_some_and(JoinHandle::is_finished) {
            return Ok(());
        }
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        let result = worker
            .join()
            .unwrap_or_else(|_| Err(CompileError::Other(anyhow!("compile worker panicked"))));
        self.logs.flush();

        match result {
            Ok(outcome) => {
                self.status = CompilerStatus::Completed;
                self.outcome = Some(outcome);
            }
            Err(error) => {
                tracing::error!("Compiler terminated in an error");
                match &error {
                    CompileError::Other(e) => tracing::error!("{:#}", e),
                    other => tracing::error!("{}", other),
                }
                self.status = CompilerStatus::Error;
                self.error = Some(error);
            }
        }

        if let Some(backup) = self.backup.take() {
            self.finalized = Some(backup.finalize()?);
        }
        Ok(())
    }
}

/// One execution of the run protocol, on the worker thread.
struct CompileRun<'a> {
    settings: &'a CompileSettings,
    modules: &'a dyn ModuleSource,
    arguments: &'a dyn ArgumentSource,
    backup: Option<&'a Path>,
    log: &'a LogSender,
}

impl CompileRun<'_> {
    fn execute(&self) -> Result<RunOutcome, CompileError> {
        let settings = self.settings;

        let compiler = PackageManager::new(settings.layout.clone(), self.log.clone()).resolve()?;
        let compiler_dir = compiler.dir().to_path_buf();
        self.log
            .info(format!("Using compiler package from {}", compiler_dir.display()));

        let modules = self.modules.modules()?;
        let loaded = fingerprints(&modules);
        let store = FingerprintStore::in_dir(&compiler_dir);
        let cached = store.load()?;
        let changes = diff(&loaded, &cached);
        self.log
            .info(format!("Modules found:\n{}", format_report(&changes)));

        let args = self.arguments.arguments(&modules)?;
        let tool = settings.layout.tool.clone();
        let command = settings.command(&compiler_dir.join(&tool), &args);
        let command_line = command.command_line_log();
        let previous = read_previous_command_line(&settings.command_line_log())?;
        let same_arguments = previous.as_deref() == Some(command_line.as_str());

        let backup_available = self.backup.is_some_and(Path::is_file);
        if !any_changed(&changes) && same_arguments && backup_available {
            self.log
                .info("No module changes detected, skipping compilation");
            return Ok(RunOutcome {
                compiler,
                changes,
                invoked: false,
            });
        }
        if !same_arguments && previous.is_some() {
            self.log.info("Compiler arguments changed since the last run");
        }

        write_string(&settings.command_line_log(), &command_line)?;
        self.log
            .info(format!("Compiler arguments:\n{}", command_line));

        let artifact = settings.artifact.clone();
        let outcome = run_captured(&command, &settings.capture_logs(), || artifact.is_file());

        if !outcome.stdout.is_empty() {
            self.log.info(format!("Compiler output:\n{}", outcome.stdout));
        }
        if !outcome.stderr.is_empty() {
            self.log.error(format!("Compiler error:\n{}", outcome.stderr));
        }

        if outcome.is_launch_failure() {
            return Err(CompileError::LaunchFailure {
                program: command.get_program().display().to_string(),
                reason: outcome
                    .failure_reason
                    .unwrap_or_else(|| "failed to start compiler".to_string()),
                hint: settings.launch_hint(),
            });
        }

        if !outcome.is_success() {
            let reason = match (outcome.exit_code, outcome.failure_reason) {
                (_, Some(reason)) => reason,
                (Some(code), None) => format!("compiler exited with code {}", code),
                (None, None) => "compiler failed".to_string(),
            };
            return Err(CompileError::ProcessFailure {
                reason,
                exit_code: outcome.exit_code,
                stdout: outcome.stdout,
                stderr: outcome.stderr,
            });
        }

        store.save(&loaded)?;
        self.log.info(format!(
            "Compiled {} module(s), cache written to {}",
            loaded.len(),
            store.path().display()
        ));

        Ok(RunOutcome {
            compiler,
            changes,
            invoked: true,
        })
    }
}

/// Read the command line persisted by the previous run, if any.
pub fn read_previous_command_line(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::builder::fingerprint::CACHE_FILE_NAME;
    use crate::core::module::LoadedModule;
    use crate::test_support::{
        fake_compiler_script, write_tgz, FakeCompiler, FixedArguments, StaticModules, TarEntry,
    };
    use std::time::Duration;
    use tempfile::TempDir;
    use uuid::Uuid;

    const TOOL: &str = "package/.Runtime/bcl.exe";

    struct Fixture {
        tmp: TempDir,
        counter: PathBuf,
        artifact: PathBuf,
    }

    impl Fixture {
        fn new(compiler: FakeCompiler) -> Self {
            let tmp = TempDir::new().unwrap();
            let counter = tmp.path().join("invocations");
            let artifact = tmp.path().join("game/Plugins/lib_generated.so");
            fs::create_dir_all(artifact.parent().unwrap()).unwrap();
            fs::create_dir_all(tmp.path().join("packages")).unwrap();

            let script = fake_compiler_script(&counter, &artifact, compiler);
            write_tgz(
                &tmp.path().join("packages/com.unity.burst@1.6.4.tgz"),
                &[TarEntry::executable(TOOL, script.as_bytes())],
            );

            Fixture {
                tmp,
                counter,
                artifact,
            }
        }

        fn settings(&self) -> CompileSettings {
            let root = self.tmp.path().to_path_buf();
            CompileSettings {
                layout: PackageLayout::new(root.join("packages"), root.join("PluginData")),
                artifact: self.artifact.clone(),
                logs_dir: root.join("Logs"),
                runtime: Some("sh".to_string()),
                root,
            }
        }

        fn modules(&self) -> Vec<LoadedModule> {
            vec![LoadedModule {
                identity: "GameData/Mod/Mod".to_string(),
                content_hash: Uuid::from_u128(42),
                version: None,
                path: self.tmp.path().join("GameData/Mod/Mod.dll"),
            }]
        }

        fn orchestrator(&self, modules: Vec<LoadedModule>, args: &[&str]) -> CompileOrchestrator {
            CompileOrchestrator::new(
                self.settings(),
                Arc::new(StaticModules(modules)),
                Arc::new(FixedArguments::new(args)),
            )
        }

        fn invocations(&self) -> usize {
            fs::read_to_string(&self.counter)
                .map(|s| s.lines().count())
                .unwrap_or(0)
        }

        fn cache_file(&self) -> PathBuf {
            self.tmp
                .path()
                .join("PluginData")
                .join(format!("kiln@{}-com.unity.burst@1.6.4", env!("CARGO_PKG_VERSION")))
                .join(CACHE_FILE_NAME)
        }
    }

    fn run(orchestrator: &mut CompileOrchestrator) -> CompilerStatus {
        orchestrator.init().unwrap();
        orchestrator
            .run_to_completion(|_| std::thread::sleep(Duration::from_millis(5)))
            .unwrap()
    }

    #[test]
    fn test_first_run_compiles_and_caches() {
        let fx = Fixture::new(FakeCompiler::Succeeds);
        let mut orchestrator = fx.orchestrator(fx.modules(), &["--fastmath"]);

        assert_eq!(run(&mut orchestrator), CompilerStatus::Completed);

        assert_eq!(fx.invocations(), 1);
        assert!(fx.artifact.is_file());
        assert!(fx.cache_file().is_file());
        assert_eq!(orchestrator.finalized(), Some(Finalized::NoBackup));
        assert!(orchestrator.outcome().unwrap().invoked);

        let command_line =
            fs::read_to_string(fx.tmp.path().join("Logs").join(COMMAND_LINE_LOG)).unwrap();
        assert!(command_line.starts_with("sh\n  "));
        assert!(command_line.ends_with("\n  --fastmath"));
        let info = fs::read_to_string(fx.tmp.path().join("Logs").join(INFO_LOG)).unwrap();
        assert!(info.contains("compiling"));
    }

    #[test]
    fn test_unchanged_second_run_skips() {
        let fx = Fixture::new(FakeCompiler::Succeeds);
        assert_eq!(
            run(&mut fx.orchestrator(fx.modules(), &["--fastmath"])),
            CompilerStatus::Completed
        );
        let artifact = fs::read(&fx.artifact).unwrap();
        let cache = fs::read(fx.cache_file()).unwrap();

        let mut second = fx.orchestrator(fx.modules(), &["--fastmath"]);
        assert_eq!(run(&mut second), CompilerStatus::Completed);

        assert_eq!(fx.invocations(), 1);
        assert!(!second.outcome().unwrap().invoked);
        assert_eq!(second.finalized(), Some(Finalized::Restored));
        assert_eq!(fs::read(&fx.artifact).unwrap(), artifact);
        assert_eq!(fs::read(fx.cache_file()).unwrap(), cache);
    }

    #[test]
    fn test_changed_arguments_recompile() {
        let fx = Fixture::new(FakeCompiler::Succeeds);
        run(&mut fx.orchestrator(fx.modules(), &["--fastmath"]));

        let mut second = fx.orchestrator(fx.modules(), &["--disable-opt"]);
        assert_eq!(run(&mut second), CompilerStatus::Completed);

        assert_eq!(fx.invocations(), 2);
        assert_eq!(second.finalized(), Some(Finalized::Discarded));
    }

    #[test]
    fn test_changed_module_recompiles() {
        let fx = Fixture::new(FakeCompiler::Succeeds);
        run(&mut fx.orchestrator(fx.modules(), &[]));

        let mut modules = fx.modules();
        modules[0].content_hash = Uuid::from_u128(43);
        assert_eq!(
            run(&mut fx.orchestrator(modules, &[])),
            CompilerStatus::Completed
        );

        assert_eq!(fx.invocations(), 2);
    }

    #[test]
    fn test_missing_backup_prevents_skip() {
        let fx = Fixture::new(FakeCompiler::Succeeds);
        run(&mut fx.orchestrator(fx.modules(), &[]));
        fs::remove_file(&fx.artifact).unwrap();

        let mut second = fx.orchestrator(fx.modules(), &[]);
        assert_eq!(run(&mut second), CompilerStatus::Completed);

        assert_eq!(fx.invocations(), 2);
        assert!(second.outcome().unwrap().invoked);
        assert!(fx.artifact.is_file());
    }

    #[test]
    fn test_missing_artifact_is_error_and_restores_backup() {
        let fx = Fixture::new(FakeCompiler::ProducesNothing);
        fs::write(&fx.artifact, "previous").unwrap();

        let mut orchestrator = fx.orchestrator(fx.modules(), &[]);
        assert_eq!(run(&mut orchestrator), CompilerStatus::Error);

        assert_eq!(fx.invocations(), 1);
        assert!(matches!(
            orchestrator.error(),
            Some(CompileError::ProcessFailure {
                exit_code: Some(0),
                ..
            })
        ));
        assert_eq!(orchestrator.finalized(), Some(Finalized::Restored));
        assert_eq!(fs::read_to_string(&fx.artifact).unwrap(), "previous");
        assert!(!fx.cache_file().exists());
    }

    #[test]
    fn test_nonzero_exit_keeps_output() {
        let fx = Fixture::new(FakeCompiler::Fails(3));

        let mut orchestrator = fx.orchestrator(fx.modules(), &[]);
        assert_eq!(run(&mut orchestrator), CompilerStatus::Error);

        match orchestrator.error() {
            Some(CompileError::ProcessFailure {
                exit_code, stderr, ..
            }) => {
                assert_eq!(*exit_code, Some(3));
                assert!(stderr.contains("simulated failure"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!fx.cache_file().exists());
    }

    #[test]
    fn test_missing_package_is_error() {
        let fx = Fixture::new(FakeCompiler::Succeeds);
        fs::remove_dir_all(fx.tmp.path().join("packages")).unwrap();
        fs::write(&fx.artifact, "previous").unwrap();

        let mut orchestrator = fx.orchestrator(fx.modules(), &[]);
        assert_eq!(run(&mut orchestrator), CompilerStatus::Error);

        assert!(matches!(
            orchestrator.error(),
            Some(CompileError::ConfigurationAbsent(_))
        ));
        assert_eq!(fx.invocations(), 0);
        assert_eq!(fs::read_to_string(&fx.artifact).unwrap(), "previous");
    }

    #[test]
    fn test_launch_failure() {
        let fx = Fixture::new(FakeCompiler::Succeeds);
        let mut settings = fx.settings();
        settings.runtime = Some("kiln-no-such-runtime".to_string());
        let mut orchestrator = CompileOrchestrator::new(
            settings,
            Arc::new(StaticModules(fx.modules())),
            Arc::new(FixedArguments::new(&[])),
        );

        assert_eq!(run(&mut orchestrator), CompilerStatus::Error);
        match orchestrator.error() {
            Some(CompileError::LaunchFailure { hint, .. }) => {
                assert!(hint.as_deref().unwrap().contains("mono"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_start_is_idempotent() {
        let fx = Fixture::new(FakeCompiler::Succeeds);
        let mut orchestrator = fx.orchestrator(fx.modules(), &[]);

        orchestrator.start().unwrap();
        orchestrator.start().unwrap();
        assert_eq!(orchestrator.status(), CompilerStatus::Started);
        assert_eq!(run(&mut orchestrator), CompilerStatus::Completed);
        assert_eq!(orchestrator.run_once().unwrap(), CompilerStatus::Completed);

        assert_eq!(fx.invocations(), 1);
    }
}
