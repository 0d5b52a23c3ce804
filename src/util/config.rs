//! Configuration file support for Kiln.
//!
//! Kiln supports two configuration file locations:
//! - Global: `~/.kiln/config.toml` - User-wide defaults
//! - Project: `Kiln.toml` - Project-specific settings
//!
//! Project config takes precedence over global config. Relative paths are
//! resolved against the project root.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::builder::options::{CompilerOptions, OptionValue, Platform};
use crate::builder::orchestrator::CompileSettings;
use crate::core::module::DirectoryModuleSource;
use crate::sources::package::{PackageLayout, DEFAULT_PACKAGE_PATTERN, DEFAULT_TOOL_PATH};

/// Project configuration file name.
pub const PROJECT_CONFIG_FILE: &str = "Kiln.toml";

/// Default name of the generated library, without extension.
pub const DEFAULT_LIBRARY_NAME: &str = "lib_burst_generated";

/// Kiln configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory layout
    pub paths: PathsConfig,

    /// Compiler package settings
    pub package: PackageConfig,

    /// Compiler options
    pub compiler: CompilerConfig,
}

/// Where things live, relative to the project root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory searched for package archives (default: project root)
    pub package_dir: Option<PathBuf>,

    /// Root for extracted packages (default: `PluginData`)
    pub extract_dir: Option<PathBuf>,

    /// Directory scanned for modules (default: `GameData`)
    pub module_dir: Option<PathBuf>,

    /// Module file patterns inside `module_dir` (default: `**/*.dll`)
    pub module_patterns: Vec<String>,

    /// Extra folders searched for referenced assemblies
    pub reference_dirs: Vec<PathBuf>,

    /// The file the compiler produces
    pub artifact: Option<PathBuf>,

    /// Directory for the sidecar logs (default: `Logs/kiln`)
    pub logs_dir: Option<PathBuf>,
}

/// Compiler package settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    /// Archive name pattern
    pub pattern: Option<String>,

    /// Compiler executable relative to the extracted package
    pub tool: Option<PathBuf>,

    /// Interpreter used to launch the compiler (e.g. `mono`)
    pub runtime: Option<String>,
}

/// Declared compiler options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Target platform (default: host)
    pub platform: Option<String>,

    /// Single-valued options by name
    pub options: BTreeMap<String, OptionValue>,

    /// Repeatable options by name
    pub multi: BTreeMap<String, Vec<OptionValue>>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {:#}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        // Paths
        if other.paths.package_dir.is_some() {
            self.paths.package_dir = other.paths.package_dir;
        }
        if other.paths.extract_dir.is_some() {
            self.paths.extract_dir = other.paths.extract_dir;
        }
        if other.paths.module_dir.is_some() {
            self.paths.module_dir = other.paths.module_dir;
        }
        if !other.paths.module_patterns.is_empty() {
            self.paths.module_patterns = other.paths.module_patterns;
        }
        if !other.paths.reference_dirs.is_empty() {
            self.paths.reference_dirs = other.paths.reference_dirs;
        }
        if other.paths.artifact.is_some() {
            self.paths.artifact = other.paths.artifact;
        }
        if other.paths.logs_dir.is_some() {
            self.paths.logs_dir = other.paths.logs_dir;
        }

        // Package
        if other.package.pattern.is_some() {
            self.package.pattern = other.package.pattern;
        }
        if other.package.tool.is_some() {
            self.package.tool = other.package.tool;
        }
        if other.package.runtime.is_some() {
            self.package.runtime = other.package.runtime;
        }

        // Compiler options merge per name
        if other.compiler.platform.is_some() {
            self.compiler.platform = other.compiler.platform;
        }
        self.compiler.options.extend(other.compiler.options);
        self.compiler.multi.extend(other.compiler.multi);
    }

    /// Package archive locations.
    pub fn package_layout(&self, root: &Path) -> PackageLayout {
        let package_dir = resolve(root, self.paths.package_dir.as_deref(), ".");
        let extract_dir = resolve(root, self.paths.extract_dir.as_deref(), "PluginData");

        PackageLayout::new(package_dir, extract_dir)
            .with_pattern(
                self.package
                    .pattern
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PACKAGE_PATTERN.to_string()),
            )
            .with_tool(
                self.package
                    .tool
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_TOOL_PATH)),
            )
    }

    /// The file the compiler produces.
    pub fn artifact(&self, root: &Path) -> PathBuf {
        match &self.paths.artifact {
            Some(path) => root.join(path),
            None => root.join(format!(
                "{}{}",
                DEFAULT_LIBRARY_NAME,
                native_library_extension()
            )),
        }
    }

    pub fn logs_dir(&self, root: &Path) -> PathBuf {
        resolve(root, self.paths.logs_dir.as_deref(), "Logs/kiln")
    }

    /// Settings for a compile run rooted at `root`.
    pub fn compile_settings(&self, root: &Path) -> CompileSettings {
        CompileSettings {
            root: root.to_path_buf(),
            layout: self.package_layout(root),
            artifact: self.artifact(root),
            logs_dir: self.logs_dir(root),
            runtime: self.package.runtime.clone(),
        }
    }

    /// The module scanner for the configured module directory.
    pub fn module_source(&self, root: &Path) -> DirectoryModuleSource {
        let patterns = if self.paths.module_patterns.is_empty() {
            vec!["**/*.dll".to_string()]
        } else {
            self.paths.module_patterns.clone()
        };
        DirectoryModuleSource::new(
            resolve(root, self.paths.module_dir.as_deref(), "GameData"),
            patterns,
        )
    }

    /// Validated compiler options. Fails only on an unknown platform.
    pub fn compiler_options(&self, root: &Path) -> Result<CompilerOptions> {
        let platform = match &self.compiler.platform {
            Some(name) => name.parse::<Platform>()?,
            None => Platform::host(),
        };
        let reference_dirs = self
            .paths
            .reference_dirs
            .iter()
            .map(|dir| root.join(dir))
            .collect();

        Ok(CompilerOptions::new(root, self.artifact(root))
            .with_platform(platform)
            .with_reference_dirs(reference_dirs)
            .with_declared(&self.compiler.options, &self.compiler.multi))
    }
}

fn resolve(root: &Path, configured: Option<&Path>, default: &str) -> PathBuf {
    match configured {
        Some(path) => root.join(path),
        None if default == "." => root.to_path_buf(),
        None => root.join(default),
    }
}

/// File extension of native libraries on the host.
pub fn native_library_extension() -> &'static str {
    if cfg!(windows) {
        ".dll"
    } else if cfg!(target_os = "macos") {
        ".bundle"
    } else {
        ".so"
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (Kiln.toml)
/// 2. Global config (~/.kiln/config.toml)
/// 3. Defaults
pub fn load_config(global_path: Option<&Path>, project_path: &Path) -> Result<Config> {
    let mut config = Config::default();

    // A broken global config should not block every project.
    if let Some(global_path) = global_path {
        config.merge(Config::load_or_default(global_path));
    }

    // A broken project config is an error.
    if project_path.exists() {
        config.merge(Config::load(project_path)?);
    }

    Ok(config)
}

/// Get the global kiln config directory (~/.kiln).
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".kiln"))
}
