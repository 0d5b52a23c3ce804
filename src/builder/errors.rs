//! Compile run error types.

use thiserror::Error;

/// Why a compile run ended in the `Error` state.
#[derive(Debug, Error)]
pub enum CompileError {
    /// No compiler package could be located anywhere.
    #[error("compiler package not found: {0}")]
    ConfigurationAbsent(String),

    /// The compiler executable could not be started.
    #[error("{reason}{}", hint.as_deref().map(|h| format!("\nhint: {}", h)).unwrap_or_default())]
    LaunchFailure {
        program: String,
        reason: String,
        hint: Option<String>,
    },

    /// The compiler ran but failed or produced no output.
    #[error("{reason}")]
    ProcessFailure {
        reason: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CompileError {
    /// Captured standard error of a failed compiler run, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            CompileError::ProcessFailure { stderr, .. } if !stderr.is_empty() => Some(stderr),
            _ => None,
        }
    }

    /// Captured standard output of a failed compiler run, if any.
    pub fn stdout(&self) -> Option<&str> {
        match self {
            CompileError::ProcessFailure { stdout, .. } if !stdout.is_empty() => Some(stdout),
            _ => None,
        }
    }
}
