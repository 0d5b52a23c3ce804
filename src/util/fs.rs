//! Filesystem utilities.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use glob::{glob, Pattern};

/// Outcome of a best-effort removal.
///
/// Real I/O failures are reported through the surrounding `io::Result`;
/// these variants only describe the benign outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The entry was removed.
    Removed,
    /// There was nothing to remove.
    Absent,
    /// The directory still has contents and was left in place.
    NotEmpty,
}

/// Remove a file, treating a missing file as nothing to do.
pub fn remove_file_if_exists(path: &Path) -> io::Result<Removal> {
    match fs::remove_file(path) {
        Ok(()) => Ok(Removal::Removed),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Removal::Absent),
        Err(e) => Err(e),
    }
}

/// Remove a directory only if it is empty.
pub fn remove_dir_if_empty(path: &Path) -> io::Result<Removal> {
    match fs::remove_dir(path) {
        Ok(()) => Ok(Removal::Removed),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Removal::Absent),
        // Some platforms report EEXIST instead of ENOTEMPTY for rmdir.
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::DirectoryNotEmpty | io::ErrorKind::AlreadyExists
            ) =>
        {
            Ok(Removal::NotEmpty)
        }
        Err(e) => Err(e),
    }
}

/// Remove a file, or a directory if it is empty.
pub fn remove_entry(path: &Path) -> io::Result<Removal> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => remove_dir_if_empty(path),
        Ok(_) => remove_file_if_exists(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Removal::Absent),
        Err(e) => Err(e),
    }
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Write a string to a file, creating parent directories if needed.
pub fn write_string(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    fs::write(path, contents)
        .with_context(|| format!("failed to write file: {}", path.display()))
}

/// Rename a file, with nice error messages.
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to)
        .with_context(|| format!("failed to move {} to {}", from.display(), to.display()))
}

/// Find files matching glob patterns relative to a base directory.
///
/// The base directory is escaped, so only the patterns are interpreted.
pub fn glob_files(base: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut results = Vec::new();
    let escaped_base = Pattern::escape(&base.to_string_lossy());

    for pattern in patterns {
        let full_pattern = format!("{}/{}", escaped_base.trim_end_matches('/'), pattern);

        for entry in
            glob(&full_pattern).with_context(|| format!("invalid glob pattern: {}", pattern))?
        {
            match entry {
                Ok(path) => {
                    if path.is_file() {
                        results.push(path);
                    }
                }
                Err(e) => {
                    tracing::warn!("glob error: {}", e);
                }
            }
        }
    }

    results.sort();
    results.dedup();
    Ok(results)
}

/// Get the relative path from `base` to `path`.
pub fn relative_path(base: &Path, path: &Path) -> PathBuf {
    pathdiff::diff_paths(path, base).unwrap_or_else(|| path.to_path_buf())
}

/// Check that a path is relative and never climbs above its root.
pub fn is_contained_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Join path components with `/` regardless of platform.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
