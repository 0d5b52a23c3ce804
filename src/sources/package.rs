//! Compiler package resolution.
//!
//! Finds the newest package archive, extracts it into a directory tagged with
//! this tool's own version, and falls back to any earlier extraction that
//! still carries the compiler when that is not possible.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::builder::errors::CompileError;
use crate::core::version::{select_greatest, VERSION_DELIMITER};
use crate::sources::archive::{archive_stem, clean_old, extract_archive, is_archive};
use crate::util::fs::glob_files;
use crate::util::log::LogSender;

/// Default archive name pattern.
pub const DEFAULT_PACKAGE_PATTERN: &str = "*burst*@*";

/// Default location of the compiler inside an extracted package.
pub const DEFAULT_TOOL_PATH: &str = "package/.Runtime/bcl.exe";

/// Prefix of every extraction directory name.
pub const EXTRACTION_PREFIX: &str = "kiln";

/// Where packages are looked for and unpacked.
#[derive(Debug, Clone)]
pub struct PackageLayout {
    /// Directory searched for package archives.
    pub package_dir: PathBuf,
    /// Root under which archives are extracted.
    pub extract_dir: PathBuf,
    /// Archive file name pattern.
    pub pattern: String,
    /// Compiler executable relative to an extraction directory.
    pub tool: PathBuf,
}

impl PackageLayout {
    pub fn new(package_dir: impl Into<PathBuf>, extract_dir: impl Into<PathBuf>) -> Self {
        PackageLayout {
            package_dir: package_dir.into(),
            extract_dir: extract_dir.into(),
            pattern: DEFAULT_PACKAGE_PATTERN.to_string(),
            tool: PathBuf::from(DEFAULT_TOOL_PATH),
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn with_tool(mut self, tool: impl Into<PathBuf>) -> Self {
        self.tool = tool.into();
        self
    }

    /// Pattern matching extraction directories of any package version.
    ///
    /// `*burst*@*` becomes `*burst*`, which matches both
    /// `kiln@0.1.0-com.unity.burst@1.6.4` and hand-unpacked directories.
    fn extraction_pattern(&self) -> &str {
        self.pattern
            .split(VERSION_DELIMITER)
            .next()
            .filter(|p| !p.is_empty())
            .unwrap_or("*")
    }
}

/// A directory containing the compiler, and how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompilerLocation {
    /// Freshly extracted from the newest archive.
    Extracted(PathBuf),
    /// The newest archive had already been extracted.
    Reused(PathBuf),
    /// An older extraction, used because the newest archive could not provide one.
    Existing { dir: PathBuf, reason: String },
}

impl CompilerLocation {
    pub fn dir(&self) -> &Path {
        match self {
            CompilerLocation::Extracted(dir) | CompilerLocation::Reused(dir) => dir,
            CompilerLocation::Existing { dir, .. } => dir,
        }
    }
}

/// Locates and unpacks the compiler package.
#[derive(Debug, Clone)]
pub struct PackageManager {
    layout: PackageLayout,
    own_version: String,
    log: LogSender,
}

impl PackageManager {
    pub fn new(layout: PackageLayout, log: LogSender) -> Self {
        PackageManager {
            layout,
            own_version: env!("CARGO_PKG_VERSION").to_string(),
            log,
        }
    }

    /// Override the version used to tag extraction directories.
    pub fn with_own_version(mut self, version: impl Into<String>) -> Self {
        self.own_version = version.into();
        self
    }

    pub fn layout(&self) -> &PackageLayout {
        &self.layout
    }

    /// Newest archive in the package directory, if any.
    pub fn find_archive(&self) -> Result<Option<PathBuf>> {
        if !self.layout.package_dir.is_dir() {
            return Ok(None);
        }

        let candidates = glob_files(&self.layout.package_dir, &[self.layout.pattern.clone()])?;
        Ok(select_greatest(
            candidates.into_iter().filter(|path| is_archive(path)),
        ))
    }

    /// Extraction directory for an archive.
    ///
    /// Tagged with this tool's version so an upgrade extracts afresh instead
    /// of trusting an extraction made by an older release.
    pub fn extraction_dir_for(&self, archive: &Path) -> PathBuf {
        self.layout.extract_dir.join(format!(
            "{}{}{}-{}",
            EXTRACTION_PREFIX,
            VERSION_DELIMITER,
            self.own_version,
            archive_stem(archive)
        ))
    }

    /// Whether `dir` contains the compiler executable.
    pub fn contains_tool(&self, dir: &Path) -> bool {
        dir.join(&self.layout.tool).is_file()
    }

    /// Path of the compiler executable inside `dir`.
    pub fn tool_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.layout.tool)
    }

    /// Newest extraction under the extraction root that contains the compiler.
    pub fn find_existing(&self) -> Result<Option<PathBuf>> {
        if !self.layout.extract_dir.is_dir() {
            return Ok(None);
        }

        let pattern = format!(
            "{}/{}",
            self.layout.extraction_pattern(),
            self.layout.tool.to_string_lossy().replace('\\', "/")
        );
        let tool_depth = self.layout.tool.components().count();

        let dirs = glob_files(&self.layout.extract_dir, &[pattern])?
            .into_iter()
            .filter_map(|tool| {
                let mut dir = tool.as_path();
                for _ in 0..tool_depth {
                    dir = dir.parent()?;
                }
                Some(dir.to_path_buf())
            });

        Ok(select_greatest(dirs))
    }

    /// Find the compiler `resolve` would use, without extracting or cleaning anything.
    ///
    /// Returns `None` when the newest archive still needs to be extracted
    /// and no earlier extraction exists either.
    pub fn locate(&self) -> Result<Option<PathBuf>> {
        if let Some(archive) = self.find_archive()? {
            let destination = self.extraction_dir_for(&archive);
            if self.contains_tool(&destination) {
                return Ok(Some(destination));
            }
        }
        self.find_existing()
    }

    /// Find a usable compiler, extracting the newest archive if needed.
    pub fn resolve(&self) -> Result<CompilerLocation, CompileError> {
        let Some(archive) = self.find_archive()? else {
            return self.fallback(format!(
                "could not find a package archive in {}",
                self.layout.package_dir.display()
            ));
        };

        let destination = self.extraction_dir_for(&archive);

        if destination.exists() {
            if self.contains_tool(&destination) {
                self.log.info(format!(
                    "Package destination '{}' already exists, not extracting",
                    destination.display()
                ));
                return Ok(CompilerLocation::Reused(destination));
            }

            return self.fallback(format!(
                "package destination '{}' already exists but it doesn't contain the compiler",
                destination.display()
            ));
        }

        // A new extraction replaces every earlier one.
        clean_old(&self.layout.extract_dir, &self.log)?;
        extract_archive(&archive, &destination, &self.log)?;

        if self.contains_tool(&destination) {
            return Ok(CompilerLocation::Extracted(destination));
        }

        self.fallback(format!(
            "{} doesn't contain the compiler",
            archive.display()
        ))
    }

    fn fallback(&self, reason: String) -> Result<CompilerLocation, CompileError> {
        match self.find_existing()? {
            Some(dir) => {
                self.log
                    .info(format!("{}, using one from {}", reason, dir.display()));
                Ok(CompilerLocation::Existing { dir, reason })
            }
            None => Err(CompileError::ConfigurationAbsent(format!(
                "{} and none was found in {}",
                reason,
                self.layout.extract_dir.display()
            ))),
        }
    }
}
