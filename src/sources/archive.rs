//! Compiler package archives.
//!
//! Archives are unpacked into a fresh directory. Every path written is
//! recorded in an extraction manifest stored inside that directory, so a
//! later cleanup can remove exactly what the extraction created and nothing
//! else. A failed extraction removes everything it wrote before returning
//! the error.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use walkdir::WalkDir;

use crate::builder::fingerprint::FingerprintStore;
use crate::util::fs::{is_contained_relative, remove_dir_if_empty, remove_entry, Removal};
use crate::util::log::LogSender;

/// Name of the manifest file written into each extraction directory.
pub const MANIFEST_FILE_NAME: &str = ".kiln";

/// Recognised archive extensions, longest first.
pub const ARCHIVE_EXTENSIONS: &[&str] = &[".tar.gz", ".tgz", ".tar"];

/// Check whether a path names a supported archive.
pub fn is_archive(path: &Path) -> bool {
    archive_extension(path).is_some()
}

fn archive_extension(path: &Path) -> Option<&'static str> {
    let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
    ARCHIVE_EXTENSIONS
        .iter()
        .copied()
        .find(|ext| name.len() > ext.len() && name.ends_with(ext))
}

/// File name of an archive without its archive extension.
pub fn archive_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match archive_extension(path) {
        Some(ext) => name[..name.len() - ext.len()].to_string(),
        None => name,
    }
}

/// Relative paths written by one extraction.
///
/// Files come first, then directories ordered deepest-first, so removing the
/// entries in order empties each directory before it is removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionManifest {
    entries: Vec<PathBuf>,
}

impl ExtractionManifest {
    fn from_written(written: &Written) -> Self {
        let mut dirs = written.dirs.clone();
        // Stable, so equally deep directories keep creation order.
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));

        let mut entries = written.files.clone();
        entries.extend(dirs);
        ExtractionManifest { entries }
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    /// Load a manifest file. A missing file yields an empty manifest.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(ExtractionManifest::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read extraction manifest: {}", path.display()))?;

        let entries = content
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect();

        Ok(ExtractionManifest { entries })
    }

    /// Save the manifest, one relative path per line with `/` separators.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut content = String::new();
        for entry in &self.entries {
            content.push_str(&entry.to_string_lossy().replace('\\', "/"));
            content.push('\n');
        }

        fs::write(path, content)
            .with_context(|| format!("failed to write extraction manifest: {}", path.display()))
    }
}

/// Bookkeeping of an extraction in progress.
#[derive(Debug, Default)]
struct Written {
    root_created: bool,
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
    known_dirs: HashSet<PathBuf>,
}

impl Written {
    /// Create `relative` and all its ancestors below `dest`, recording each.
    fn create_dirs(&mut self, dest: &Path, relative: &Path) -> Result<()> {
        let mut current = PathBuf::new();
        for component in relative.components() {
            current.push(component);
            if self.known_dirs.contains(&current) {
                continue;
            }

            let path = dest.join(&current);
            fs::create_dir(&path)
                .with_context(|| format!("failed to create directory: {}", path.display()))?;
            self.known_dirs.insert(current.clone());
            self.dirs.push(current.clone());
        }
        Ok(())
    }
}

/// Extract `archive` into `destination`, which must not exist yet.
///
/// On success the manifest is saved as [`MANIFEST_FILE_NAME`] inside the
/// destination. On failure everything written so far is removed again.
pub fn extract_archive(
    archive: &Path,
    destination: &Path,
    log: &LogSender,
) -> Result<ExtractionManifest> {
    if destination.exists() {
        bail!("{} already exists", destination.display());
    }

    let mut written = Written::default();
    let result = unpack(archive, destination, &mut written, log).and_then(|()| {
        let manifest = ExtractionManifest::from_written(&written);
        manifest.save(&destination.join(MANIFEST_FILE_NAME))?;
        Ok(manifest)
    });

    match result {
        Ok(manifest) => {
            log.info(format!(
                "{} extracted to {}",
                archive.display(),
                destination.display()
            ));
            Ok(manifest)
        }
        Err(e) => {
            log.error(format!(
                "Error extracting archive {} to {}",
                archive.display(),
                destination.display()
            ));
            roll_back(destination, &written, log);
            Err(e)
        }
    }
}

fn open_archive(archive: &Path) -> Result<tar::Archive<Box<dyn Read>>> {
    let file = File::open(archive)
        .with_context(|| format!("failed to open archive: {}", archive.display()))?;
    let reader = BufReader::new(file);

    let reader: Box<dyn Read> = match archive_extension(archive) {
        Some(".tar") => Box::new(reader),
        _ => Box::new(GzDecoder::new(reader)),
    };

    Ok(tar::Archive::new(reader))
}

fn unpack(archive: &Path, dest: &Path, written: &mut Written, log: &LogSender) -> Result<()> {
    let mut tarball = open_archive(archive)?;

    fs::create_dir_all(dest)
        .with_context(|| format!("failed to create destination directory: {}", dest.display()))?;
    written.root_created = true;

    for entry in tarball
        .entries()
        .with_context(|| format!("failed to read archive entries: {}", archive.display()))?
    {
        let mut entry = entry.context("failed to read archive entry")?;
        let entry_path = entry.path().context("failed to get entry path")?.into_owned();

        let relative: PathBuf = entry_path
            .components()
            .filter(|c| !matches!(c, std::path::Component::CurDir))
            .collect();
        if relative.as_os_str().is_empty() {
            continue;
        }
        if !is_contained_relative(&relative) {
            bail!(
                "archive entry escapes destination directory: {}",
                entry_path.display()
            );
        }

        match entry.header().entry_type() {
            tar::EntryType::Directory => {
                written.create_dirs(dest, &relative)?;
            }
            tar::EntryType::Regular | tar::EntryType::Continuous => {
                if let Some(parent) = relative.parent() {
                    written.create_dirs(dest, parent)?;
                }

                let output_path = dest.join(&relative);
                if output_path.exists() {
                    bail!("duplicate archive entry: {}", relative.display());
                }
                // Recorded first: a failed unpack may leave a partial file.
                written.files.push(relative);
                entry.unpack(&output_path).with_context(|| {
                    format!("failed to extract file: {}", output_path.display())
                })?;
            }
            other => {
                // Links and special files are never needed by the compiler package.
                log.debug(format!("skipping {:?} entry {}", other, relative.display()));
            }
        }
    }

    Ok(())
}

/// Remove everything an aborted extraction wrote.
fn roll_back(dest: &Path, written: &Written, log: &LogSender) {
    let manifest_path = dest.join(MANIFEST_FILE_NAME);
    let files = written.files.iter().map(|f| dest.join(f));
    let dirs = written.dirs.iter().rev().map(|d| dest.join(d));

    for path in std::iter::once(manifest_path).chain(files).chain(dirs) {
        if let Err(e) = remove_entry(&path) {
            log.warn(format!("failed to remove {}: {}", path.display(), e));
        }
    }

    if written.root_created {
        match remove_dir_if_empty(dest) {
            Ok(Removal::NotEmpty) => log.warn(format!(
                "{} is not empty after rollback, leaving it in place",
                dest.display()
            )),
            Ok(_) => {}
            Err(e) => log.warn(format!("failed to remove {}: {}", dest.display(), e)),
        }
    }
}

/// Remove every previous extraction found below `root`.
///
/// Each extraction is identified by its manifest. Only the listed entries,
/// the manifest itself and the colocated fingerprint cache are removed;
/// directories that still have other contents are left alone. Returns the
/// directories that were cleaned.
pub fn clean_old(root: &Path, log: &LogSender) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut manifests = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.with_context(|| format!("failed to scan {}", root.display()))?;
        if entry.file_type().is_file() && entry.file_name() == MANIFEST_FILE_NAME {
            manifests.push(entry.into_path());
        }
    }

    let mut cleaned = Vec::new();
    for manifest_path in manifests {
        let Some(dir) = manifest_path.parent().map(Path::to_path_buf) else {
            continue;
        };

        log.info(format!("Cleaning old files from '{}'", dir.display()));

        let manifest = ExtractionManifest::load(&manifest_path)?;
        fs::remove_file(&manifest_path).with_context(|| {
            format!("failed to remove manifest: {}", manifest_path.display())
        })?;
        FingerprintStore::in_dir(&dir).delete()?;

        for entry in manifest.entries() {
            if !is_contained_relative(entry) {
                log.warn(format!(
                    "ignoring manifest entry outside of {}: {}",
                    dir.display(),
                    entry.display()
                ));
                continue;
            }
            let path = dir.join(entry);
            remove_entry(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }

        if remove_dir_if_empty(&dir)
            .with_context(|| format!("failed to remove {}", dir.display()))?
            == Removal::NotEmpty
        {
            log.debug(format!("{} still has other files, keeping it", dir.display()));
        }

        cleaned.push(dir);
    }

    cleaned.sort();
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{tar_bytes, write_tgz, TarEntry};
    use crate::util::log::LogQueue;
    use tempfile::TempDir;

    fn read_manifest(dest: &Path) -> Vec<String> {
        fs::read_to_string(dest.join(MANIFEST_FILE_NAME))
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_is_archive() {
        assert!(is_archive(Path::new("com.unity.burst@1.6.4.tgz")));
        assert!(is_archive(Path::new("pkg@1.0.TAR.GZ")));
        assert!(is_archive(Path::new("pkg@1.0.tar")));
        assert!(!is_archive(Path::new("pkg@1.0.zip")));
        assert!(!is_archive(Path::new(".tgz")));
    }

    #[test]
    fn test_archive_stem() {
        assert_eq!(archive_stem(Path::new("dir/burst@1.6.4.tgz")), "burst@1.6.4");
        assert_eq!(archive_stem(Path::new("burst@1.6.4.tar.gz")), "burst@1.6.4");
        assert_eq!(archive_stem(Path::new("plain")), "plain");
    }

    #[test]
    fn test_extract_writes_manifest() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("pkg@1.0.tgz");
        write_tgz(
            &archive,
            &[
                TarEntry::dir("package/"),
                TarEntry::file("package/.Runtime/bcl.exe", b"#!/bin/sh\n"),
                TarEntry::file("package/readme.md", b"readme"),
                TarEntry::file("top.txt", b"top"),
            ],
        );
        let dest = tmp.path().join("out/pkg");
        let queue = LogQueue::new();

        let manifest = extract_archive(&archive, &dest, &queue.sender()).unwrap();

        assert_eq!(fs::read(dest.join("package/readme.md")).unwrap(), b"readme");
        assert_eq!(
            read_manifest(&dest),
            [
                "package/.Runtime/bcl.exe",
                "package/readme.md",
                "top.txt",
                "package/.Runtime",
                "package",
            ]
        );
        assert_eq!(manifest.entries().len(), 5);
    }

    #[test]
    fn test_extract_refuses_existing_destination() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("pkg@1.0.tgz");
        write_tgz(&archive, &[TarEntry::file("a.txt", b"a")]);
        let dest = tmp.path().join("dest");
        fs::create_dir(&dest).unwrap();
        fs::write(dest.join("existing.txt"), "keep").unwrap();

        let err = extract_archive(&archive, &dest, &LogQueue::new().sender()).unwrap_err();

        assert!(err.to_string().contains("already exists"));
        assert!(dest.join("existing.txt").exists());
        assert!(!dest.join("a.txt").exists());
    }

    #[test]
    fn test_failed_extraction_rolls_back() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("broken@1.0.tgz");
        // `a` is written as a file, so creating the directory `a/` for the
        // third entry fails after two entries were already written.
        write_tgz(
            &archive,
            &[
                TarEntry::file("dir/one.txt", b"one"),
                TarEntry::file("a", b"plain file"),
                TarEntry::file("a/two.txt", b"two"),
                TarEntry::file("never.txt", b"never"),
            ],
        );
        let dest = tmp.path().join("dest");
        let queue = LogQueue::new();

        assert!(extract_archive(&archive, &dest, &queue.sender()).is_err());

        assert!(!dest.exists());
        assert!(queue
            .drain()
            .iter()
            .any(|e| e.message.contains("Error extracting archive")));
    }

    #[test]
    fn test_corrupt_archive_rolls_back() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("corrupt@1.0.tgz");
        fs::write(&archive, b"this is not a gzip stream").unwrap();
        let dest = tmp.path().join("dest");

        assert!(extract_archive(&archive, &dest, &LogQueue::new().sender()).is_err());
        assert!(!dest.exists());
    }

    #[test]
    fn test_truncated_entry_rolls_back() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("truncated@1.0.tar");
        let big = vec![7u8; 200_000];
        let bytes = tar_bytes(&[TarEntry::file("package/big.bin", &big)]);
        // Cut in the middle of the entry data, after tar has created the file.
        fs::write(&archive, &bytes[..100_000]).unwrap();
        let dest = tmp.path().join("dest");

        assert!(extract_archive(&archive, &dest, &LogQueue::new().sender()).is_err());
        assert!(!dest.exists());
    }

    #[test]
    fn test_clean_old_is_precise() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("extracted");
        let archive = tmp.path().join("pkg@1.0.tgz");
        write_tgz(
            &archive,
            &[
                TarEntry::file("package/tool", b"tool"),
                TarEntry::file("package/lib/a.so", b"a"),
            ],
        );
        let dest = root.join("kiln@0.1.0-pkg@1.0");
        let log = LogQueue::new();
        extract_archive(&archive, &dest, &log.sender()).unwrap();

        // A fingerprint cache next to the extraction, a file the user added
        // inside it, and an unrelated file at the root.
        FingerprintStore::in_dir(&dest)
            .save(&Default::default())
            .unwrap();
        fs::write(dest.join("package/user.txt"), "mine").unwrap();
        fs::write(root.join("unrelated.txt"), "keep").unwrap();

        let cleaned = clean_old(&root, &log.sender()).unwrap();

        assert_eq!(cleaned, vec![dest.clone()]);
        assert!(!dest.join(MANIFEST_FILE_NAME).exists());
        assert!(!dest.join(".kiln.cache").exists());
        assert!(!dest.join("package/tool").exists());
        assert!(!dest.join("package/lib").exists());
        assert!(dest.join("package/user.txt").exists());
        assert!(root.join("unrelated.txt").exists());
    }

    #[test]
    fn test_clean_old_removes_empty_extraction() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("extracted");
        let archive = tmp.path().join("pkg@1.0.tgz");
        write_tgz(&archive, &[TarEntry::file("package/tool", b"tool")]);
        let dest = root.join("kiln@0.1.0-pkg@1.0");
        let log = LogQueue::new();
        extract_archive(&archive, &dest, &log.sender()).unwrap();

        clean_old(&root, &log.sender()).unwrap();

        assert!(!dest.exists());
        assert!(root.exists());
    }

    #[test]
    fn test_clean_old_missing_root() {
        let tmp = TempDir::new().unwrap();
        let cleaned = clean_old(&tmp.path().join("nope"), &LogQueue::new().sender()).unwrap();
        assert!(cleaned.is_empty());
    }
}
