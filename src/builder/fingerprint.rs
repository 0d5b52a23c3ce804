//! Fingerprint cache for incremental compiles.
//!
//! The cache records the content hash of every module the last successful
//! compile consumed, one `identity;hash` line per module. Declared versions
//! are not stored: only content decides whether a module changed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::core::module::{FingerprintSet, ModuleFingerprint};
use crate::util::fs::{remove_file_if_exists, write_string, Removal};

/// Name of the cache file, stored next to the extracted compiler.
pub const CACHE_FILE_NAME: &str = ".kiln.cache";

/// Field separator. The hash never contains it, so lines split at the last one.
pub const SEPARATOR: char = ';';

/// Reads and writes the fingerprint cache file.
#[derive(Debug, Clone)]
pub struct FingerprintStore {
    path: PathBuf,
}

impl FingerprintStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FingerprintStore { path: path.into() }
    }

    /// Store for the default cache file inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        FingerprintStore::new(dir.join(CACHE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save fingerprint cache to the file, replacing any previous content.
    pub fn save(&self, set: &FingerprintSet) -> Result<()> {
        let mut content = String::new();
        for fingerprint in set {
            let identity = fingerprint.identity();
            if identity.contains(['\n', '\r']) {
                tracing::warn!("not caching module with unsupported identity {:?}", identity);
                continue;
            }
            content.push_str(identity);
            content.push(SEPARATOR);
            content.push_str(&fingerprint.content_hash().hyphenated().to_string());
            content.push('\n');
        }

        write_string(&self.path, &content)
    }

    /// Load the cache. A missing file yields an empty set and malformed lines are skipped.
    pub fn load(&self) -> Result<FingerprintSet> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(FingerprintSet::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to read fingerprint cache: {}", self.path.display())
                })
            }
        };

        Ok(content.lines().filter_map(parse_line).collect())
    }

    /// Delete the cache file; a no-op if it does not exist.
    pub fn delete(&self) -> Result<Removal> {
        remove_file_if_exists(&self.path)
            .with_context(|| format!("failed to delete fingerprint cache: {}", self.path.display()))
    }
}

fn parse_line(line: &str) -> Option<ModuleFingerprint> {
    let line = line.trim_end_matches('\r');
    let (identity, hash) = line.rsplit_once(SEPARATOR)?;
    match Uuid::parse_str(hash.trim()) {
        Ok(hash) => Some(ModuleFingerprint::new(identity, hash)),
        Err(_) => {
            tracing::debug!("skipping malformed fingerprint cache line `{}`", line);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::version::PackageVersion;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_cache_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = FingerprintStore::in_dir(tmp.path());

        let set: FingerprintSet = [
            ModuleFingerprint::new("GameData/Foo/Foo", Uuid::from_u128(0xabc))
                .with_version(PackageVersion::new(1, 0, 0, 0)),
            ModuleFingerprint::new("GameData/Bar/Bar", Uuid::from_u128(0xdef)),
        ]
        .into_iter()
        .collect();

        store.save(&set).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded.len(), 2);
        for fingerprint in &set {
            let reloaded = loaded.get(fingerprint.identity()).unwrap();
            assert_eq!(reloaded.content_hash(), fingerprint.content_hash());
            // Versions are deliberately not persisted.
            assert_eq!(reloaded.declared_version(), None);
        }
    }

    #[test]
    fn test_missing_cache_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = FingerprintStore::in_dir(tmp.path());

        assert!(store.load().unwrap().is_empty());
        assert_eq!(store.delete().unwrap(), Removal::Absent);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let store = FingerprintStore::in_dir(tmp.path());
        let good = Uuid::from_u128(7);

        std::fs::write(
            store.path(),
            format!("no separator here\nbad;not-a-guid\nok/Mod;{}\r\n;\n", good),
        )
        .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("ok/Mod").unwrap().content_hash(), good);
    }

    #[test]
    fn test_identity_with_separator_round_trips() {
        let tmp = TempDir::new().unwrap();
        let store = FingerprintStore::in_dir(tmp.path());
        let hash = Uuid::from_u128(0x5e);
        let set: FingerprintSet = [ModuleFingerprint::new("Mods/odd;name", hash)]
            .into_iter()
            .collect();

        store.save(&set).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("Mods/odd;name").unwrap().content_hash(), hash);
        assert!(!crate::core::changes::any_changed(&crate::core::changes::diff(&set, &loaded)));
    }

    #[test]
    fn test_file_format() {
        let tmp = TempDir::new().unwrap();
        let store = FingerprintStore::in_dir(tmp.path());
        let set: FingerprintSet = [ModuleFingerprint::new("a/B", Uuid::from_u128(1))]
            .into_iter()
            .collect();

        store.save(&set).unwrap();

        assert_eq!(
            std::fs::read_to_string(store.path()).unwrap(),
            "a/B;00000000-0000-0000-0000-000000000001\n"
        );
    }

    #[test]
    fn test_delete_removes_file() {
        let tmp = TempDir::new().unwrap();
        let store = FingerprintStore::in_dir(tmp.path());
        store.save(&FingerprintSet::new()).unwrap();

        assert_eq!(store.delete().unwrap(), Removal::Removed);
        assert!(!store.path().exists());
    }
}
