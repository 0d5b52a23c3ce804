//! Subprocess execution utilities.
//!
//! [`ProcessBuilder`] describes a command; [`run_captured`] launches it with
//! both output streams piped and drained on their own threads while the child
//! runs, so a chatty compiler can never block on a full pipe.

use std::ffi::OsStr;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};

/// Builder for subprocess execution.
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    program: PathBuf,
    args: Vec<String>,
    cwd: Option<PathBuf>,
}

impl ProcessBuilder {
    /// Create a new process builder for the given program.
    pub fn new(program: impl AsRef<Path>) -> Self {
        ProcessBuilder {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            cwd: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(
            args.into_iter()
                .map(|s| s.as_ref().to_string_lossy().into_owned()),
        );
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    /// Get the program path.
    pub fn get_program(&self) -> &Path {
        &self.program
    }

    /// Get the arguments.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Build the Command. Arguments are passed as-is, no shell is involved.
    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }

        cmd
    }

    /// Display the command for error messages.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    /// Render the command one argument per line, as written to `command_line.log`.
    pub fn command_line_log(&self) -> String {
        let mut out = self.program.display().to_string();
        for arg in &self.args {
            out.push_str("\n  ");
            out.push_str(arg);
        }
        out
    }

    /// Launch the process with both output streams captured.
    pub fn spawn_captured(&self, logs: &CaptureLogs) -> io::Result<RunningProcess> {
        let mut cmd = self.build_command();
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn()?;

        let stdout = child.stdout.take().map(|out| {
            spawn_reader(out, StreamCapture::new(logs.stdout.clone()))
        });
        let stderr = child.stderr.take().map(|err| {
            spawn_reader(err, StreamCapture::new(logs.stderr.clone()))
        });

        Ok(RunningProcess {
            child,
            stdout,
            stderr,
        })
    }
}

/// Optional sidecar log files for the captured streams.
#[derive(Debug, Clone, Default)]
pub struct CaptureLogs {
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
}

/// Accumulates lines of one stream, mirroring them to a log file.
///
/// The log file is only created when the first line arrives, so a silent
/// process leaves no empty log behind.
struct StreamCapture {
    buffer: String,
    log_path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
}

impl StreamCapture {
    fn new(log_path: Option<PathBuf>) -> Self {
        StreamCapture {
            buffer: String::new(),
            log_path,
            writer: None,
        }
    }

    fn push_line(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }

        self.buffer.push_str(line);
        self.buffer.push('\n');

        if self.writer.is_none() {
            // Only try once; sidecar logs are informational.
            if let Some(path) = self.log_path.take() {
                self.writer = File::create(path).ok().map(BufWriter::new);
            }
        }
        if let Some(writer) = &mut self.writer {
            if writeln!(writer, "{}", line).is_err() {
                self.writer = None;
            }
        }
    }

    fn finish(mut self) -> String {
        if let Some(writer) = &mut self.writer {
            let _ = writer.flush();
        }
        self.buffer
    }
}

fn spawn_reader<R>(stream: R, mut capture: StreamCapture) -> JoinHandle<io::Result<String>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            if reader.read_until(b'\n', &mut raw)? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&raw);
            capture.push_line(line.trim_end_matches(['\n', '\r']));
        }
        Ok(capture.finish())
    })
}

/// A launched process whose streams are being drained.
pub struct RunningProcess {
    child: Child,
    stdout: Option<JoinHandle<io::Result<String>>>,
    stderr: Option<JoinHandle<io::Result<String>>>,
}

impl RunningProcess {
    /// Block until the child exits and both readers have finished.
    pub fn wait(mut self) -> io::Result<ProcessOutput> {
        let status = self.child.wait()?;
        let stdout = join_reader(self.stdout.take())?;
        let stderr = join_reader(self.stderr.take())?;

        Ok(ProcessOutput {
            // A signal-terminated child has no code.
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

fn join_reader(handle: Option<JoinHandle<io::Result<String>>>) -> io::Result<String> {
    match handle {
        Some(handle) => handle
            .join()
            .map_err(|_| io::Error::other("output reader thread panicked"))?,
        None => Ok(String::new()),
    }
}

/// Exit code and captured text of a finished process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Result of [`run_captured`].
///
/// When `started` is false the process never ran and `failure_reason` holds
/// the launch error. Otherwise `exit_code` is `None` only if waiting for the
/// process failed, and `failure_reason` reports a failure independent of
/// the exit code.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    pub started: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub failure_reason: Option<String>,
}

impl ProcessOutcome {
    /// Whether the process never got to run.
    pub fn is_launch_failure(&self) -> bool {
        !self.started
    }

    /// Whether the process ran, exited with 0 and passed the artifact check.
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0) && self.failure_reason.is_none()
    }
}

/// Run a process to completion, draining its output while it runs.
///
/// After a zero exit, `artifact_exists` decides whether the run actually
/// produced what it was supposed to.
pub fn run_captured(
    process: &ProcessBuilder,
    logs: &CaptureLogs,
    artifact_exists: impl FnOnce() -> bool,
) -> ProcessOutcome {
    match process.spawn_captured(logs) {
        Ok(running) => finished(process, running.wait(), artifact_exists),
        Err(e) => ProcessOutcome {
            failure_reason: Some(format!(
                "failed to start `{}`: {}",
                process.get_program().display(),
                e
            )),
            ..ProcessOutcome::default()
        },
    }
}

/// Outcome of a process that was started, given the result of waiting on it.
fn finished(
    process: &ProcessBuilder,
    waited: io::Result<ProcessOutput>,
    artifact_exists: impl FnOnce() -> bool,
) -> ProcessOutcome {
    let output = match waited {
        Ok(output) => output,
        Err(e) => {
            return ProcessOutcome {
                started: true,
                failure_reason: Some(format!(
                    "failed to wait for `{}`: {}",
                    process.get_program().display(),
                    e
                )),
                ..ProcessOutcome::default()
            }
        }
    };

    let failure_reason = if output.exit_code == 0 && !artifact_exists() {
        Some(format!(
            "`{}` exited successfully but did not produce its output",
            process.get_program().display()
        ))
    } else {
        None
    };

    ProcessOutcome {
        started: true,
        exit_code: Some(output.exit_code),
        stdout: output.stdout,
        stderr: output.stderr,
        failure_reason,
    }
}

/// Find an executable in PATH.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}
