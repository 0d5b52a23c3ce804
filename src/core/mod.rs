//! Core data structures for Kiln.
//!
//! - Versioned paths and version ordering
//! - Loaded modules and their fingerprints
//! - Change detection between fingerprint sets

pub mod changes;
pub mod module;
pub mod version;

pub use changes::ChangeRecord;
pub use module::{ContentHash, DirectoryModuleSource, LoadedModule, ModuleFingerprint, ModuleSource};
pub use version::PackageVersion;
