//! Global context for Kiln operations.
//!
//! Provides centralized access to the project root, configuration paths and
//! the merged configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::util::config::{global_config_dir, load_config, Config, PROJECT_CONFIG_FILE};

/// Global context for Kiln operations.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    /// Current working directory
    cwd: PathBuf,

    /// Kiln home directory (~/.kiln)
    home: PathBuf,

    /// Explicit project config file, overriding discovery
    config_override: Option<PathBuf>,
}

impl GlobalContext {
    /// Create a new global context.
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to get current directory")?;
        Ok(Self::with_cwd(cwd))
    }

    /// Create a context for a specific working directory.
    pub fn with_cwd(cwd: PathBuf) -> Self {
        let home = global_config_dir().unwrap_or_else(|| PathBuf::from(".kiln"));
        GlobalContext {
            cwd,
            home,
            config_override: None,
        }
    }

    /// Use `path` as the project config instead of searching for one.
    pub fn with_config(mut self, path: PathBuf) -> Self {
        self.config_override = Some(path);
        self
    }

    pub fn with_home(mut self, home: PathBuf) -> Self {
        self.home = home;
        self
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Path of the global config file.
    pub fn config_path(&self) -> PathBuf {
        self.home.join("config.toml")
    }

    /// Path of the project config file.
    ///
    /// Searches from the working directory upwards for `Kiln.toml`; when none
    /// exists, the path in the working directory is returned.
    pub fn project_config_path(&self) -> PathBuf {
        if let Some(path) = &self.config_override {
            return self.cwd.join(path);
        }

        self.cwd
            .ancestors()
            .map(|dir| dir.join(PROJECT_CONFIG_FILE))
            .find(|path| path.is_file())
            .unwrap_or_else(|| self.cwd.join(PROJECT_CONFIG_FILE))
    }

    /// Directory that relative config paths are resolved against.
    pub fn project_root(&self) -> PathBuf {
        self.project_config_path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.cwd.clone())
    }

    /// Load the merged global and project configuration.
    pub fn load_config(&self) -> Result<Config> {
        let project = self.project_config_path();
        if self.config_override.is_some() && !project.is_file() {
            anyhow::bail!("config file not found: {}", project.display());
        }

        let global = self.config_path();
        load_config(Some(&global), &project)
    }
}
