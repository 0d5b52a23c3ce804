//! Test utilities for Kiln unit tests.
//!
//! Provides in-memory package archives, a scripted stand-in for the external
//! compiler and fixed collaborators for module discovery and arguments.
//!
//! # Example
//!
//! ```rust,ignore
//! use kiln::test_support::{write_tgz, TarEntry};
//!
//! write_tgz(&dir.join("burst@1.0.tgz"), &[TarEntry::file("package/tool", b"")]);
//! ```

use std::io::Write;
use std::path::Path;

use anyhow::Result;

use crate::builder::options::ArgumentSource;
use crate::core::module::{LoadedModule, ModuleSource};

/// An entry of a test archive.
#[derive(Debug, Clone, Copy)]
pub struct TarEntry<'a> {
    pub path: &'a str,
    pub data: &'a [u8],
    pub mode: u32,
    pub is_dir: bool,
}

impl<'a> TarEntry<'a> {
    pub fn file(path: &'a str, data: &'a [u8]) -> Self {
        TarEntry {
            path,
            data,
            mode: 0o644,
            is_dir: false,
        }
    }

    pub fn executable(path: &'a str, data: &'a [u8]) -> Self {
        TarEntry {
            mode: 0o755,
            ..TarEntry::file(path, data)
        }
    }

    pub fn dir(path: &'a str) -> Self {
        TarEntry {
            path,
            data: &[],
            mode: 0o755,
            is_dir: true,
        }
    }
}

/// Build an uncompressed tarball in memory.
pub fn tar_bytes(entries: &[TarEntry<'_>]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());

    for entry in entries {
        let mut header = tar::Header::new_gnu();
        header.set_path(entry.path).unwrap();
        header.set_mode(entry.mode);
        if entry.is_dir {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
        } else {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(entry.data.len() as u64);
        }
        header.set_cksum();
        builder.append(&header, entry.data).unwrap();
    }

    builder.into_inner().unwrap()
}

/// Build a gzip-compressed tarball in memory.
pub fn tgz(entries: &[TarEntry<'_>]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&tar_bytes(entries)).unwrap();
    encoder.finish().unwrap()
}

/// Write a gzip-compressed tarball to `path`.
pub fn write_tgz(path: &Path, entries: &[TarEntry<'_>]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, tgz(entries)).unwrap();
}

/// Behaviour of the scripted compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeCompiler {
    /// Writes the artifact and exits with 0.
    Succeeds,
    /// Exits with 0 without writing the artifact.
    ProducesNothing,
    /// Prints to stderr and exits with the given code.
    Fails(i32),
}

/// A `sh` script standing in for the compiler.
///
/// Every invocation appends a line to `counter`.
pub fn fake_compiler_script(counter: &Path, artifact: &Path, behaviour: FakeCompiler) -> String {
    let mut script = format!(
        "#!/bin/sh\necho run >> '{}'\necho \"compiling $# arguments\"\n",
        counter.display()
    );
    match behaviour {
        FakeCompiler::Succeeds => {
            script.push_str(&format!("echo generated > '{}'\nexit 0\n", artifact.display()));
        }
        FakeCompiler::ProducesNothing => script.push_str("exit 0\n"),
        FakeCompiler::Fails(code) => {
            script.push_str(&format!("echo 'simulated failure' >&2\nexit {}\n", code));
        }
    }
    script
}

/// Module source returning a fixed list.
#[derive(Debug, Clone, Default)]
pub struct StaticModules(pub Vec<LoadedModule>);

impl ModuleSource for StaticModules {
    fn modules(&self) -> Result<Vec<LoadedModule>> {
        Ok(self.0.clone())
    }
}

/// Argument source returning a fixed list regardless of modules.
#[derive(Debug, Clone, Default)]
pub struct FixedArguments(Vec<String>);

impl FixedArguments {
    pub fn new(args: &[&str]) -> Self {
        FixedArguments(args.iter().map(|a| a.to_string()).collect())
    }
}

impl ArgumentSource for FixedArguments {
    fn arguments(&self, _modules: &[LoadedModule]) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}
