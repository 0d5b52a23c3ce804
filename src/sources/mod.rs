//! Compiler package sources.
//!
//! Finds versioned compiler archives and manages their extractions.

pub mod archive;
pub mod package;

pub use archive::ExtractionManifest;
pub use package::{CompilerLocation, PackageLayout, PackageManager};
