//! Backup and restore of the compiled artifact around a run.
//!
//! The previous artifact is moved aside before anything else happens, so the
//! host never sees a half-written file. When the run ends the backup is
//! either discarded, because a new artifact replaced it, or moved back.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::util::fs::{move_file, remove_file_if_exists};

/// Suffix appended to the artifact path to form the backup path.
pub const BACKUP_SUFFIX: &str = ".bak";

/// Backup path for an artifact.
pub fn backup_path(artifact: &Path) -> PathBuf {
    let mut name = OsString::from(artifact.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// What [`ArtifactBackup::finalize`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalized {
    /// No artifact was produced, the previous one was moved back.
    Restored,
    /// A new artifact exists, the previous one was deleted.
    Discarded,
    /// There was no previous artifact.
    NoBackup,
}

/// The previous artifact, moved aside for the duration of a run.
#[derive(Debug, Clone)]
pub struct ArtifactBackup {
    artifact: PathBuf,
    backup: Option<PathBuf>,
}

impl ArtifactBackup {
    /// Move the current artifact to its backup path.
    ///
    /// A stale backup from an interrupted run is replaced. When there is no
    /// artifact, a leftover backup is kept as the backup of this run.
    pub fn prepare(artifact: impl Into<PathBuf>) -> Result<Self> {
        let artifact = artifact.into();
        let backup = backup_path(&artifact);

        if artifact.is_file() {
            remove_file_if_exists(&backup)
                .with_context(|| format!("failed to remove stale backup {}", backup.display()))?;
            move_file(&artifact, &backup)?;
            tracing::info!("Backed up generated artifact to {}", backup.display());
            return Ok(ArtifactBackup {
                artifact,
                backup: Some(backup),
            });
        }

        let backup = backup.is_file().then_some(backup);
        Ok(ArtifactBackup { artifact, backup })
    }

    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    pub fn backup(&self) -> Option<&Path> {
        self.backup.as_deref()
    }

    /// Whether a backup is available to restore.
    pub fn exists(&self) -> bool {
        self.backup.as_deref().is_some_and(Path::is_file)
    }

    /// Restore or discard the backup depending on whether a new artifact exists.
    pub fn finalize(self) -> Result<Finalized> {
        let Some(backup) = self.backup.filter(|b| b.is_file()) else {
            return Ok(Finalized::NoBackup);
        };

        if self.artifact.exists() {
            remove_file_if_exists(&backup)
                .with_context(|| format!("failed to delete backup {}", backup.display()))?;
            tracing::info!("Deleted generated artifact backup {}", backup.display());
            Ok(Finalized::Discarded)
        } else {
            move_file(&backup, &self.artifact)?;
            tracing::info!("Restored generated artifact from backup {}", backup.display());
            Ok(Finalized::Restored)
        }
    }
}
