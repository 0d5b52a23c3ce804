//! High-level operations.
//!
//! This module contains the implementation of Kiln commands.

pub mod clean;
pub mod compile;
pub mod status;

pub use clean::{clean, CleanOptions, CleanReport};
pub use compile::{compile, CompileOptions, CompileReport};
pub use status::{status, StatusReport};
