//! Kiln - an incremental wrapper around an ahead-of-time compiler
//!
//! This crate provides the core library functionality for Kiln: locating
//! and extracting the versioned compiler package, fingerprinting the input
//! modules, and driving the compiler only when its inputs changed.

pub mod builder;
pub mod core;
pub mod ops;
pub mod sources;
pub mod util;

/// Test utilities for Kiln unit tests.
///
/// Provides archive builders, a scripted fake compiler and static module
/// and argument sources.
#[cfg(test)]
pub mod test_support;

pub use builder::{CompileOrchestrator, CompilerStatus};
pub use util::context::GlobalContext;
