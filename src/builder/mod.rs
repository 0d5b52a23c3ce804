//! Compiler invocation.
//!
//! This module drives a single compile run: argument rendering, the artifact
//! backup, the fingerprint cache and the background worker.

pub mod artifact;
pub mod errors;
pub mod fingerprint;
pub mod options;
pub mod orchestrator;

pub use artifact::{ArtifactBackup, Finalized};
pub use errors::CompileError;
pub use fingerprint::FingerprintStore;
pub use options::{ArgumentSource, CompilerOptions, OptionValue, Platform};
pub use orchestrator::{CompileOrchestrator, CompileSettings, CompilerStatus, RunOutcome};
