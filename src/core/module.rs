//! Loadable modules and their content fingerprints.
//!
//! The compiler consumes a set of binary modules supplied by the host. Each
//! module is identified by an origin-qualified name and fingerprinted by a
//! 128-bit content hash; the declared version only breaks ties between
//! duplicate observations of the same identity.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use rayon::prelude::*;
use uuid::Uuid;

use crate::core::version::{PackageVersion, VERSION_DELIMITER};
use crate::util::fs::{glob_files, relative_path, to_slash};
use crate::util::hash::content_id_file;

/// Content identity of a module.
pub type ContentHash = Uuid;

/// Immutable fingerprint of one loadable module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFingerprint {
    identity: String,
    content_hash: ContentHash,
    declared_version: Option<PackageVersion>,
}

impl ModuleFingerprint {
    pub fn new(identity: impl Into<String>, content_hash: ContentHash) -> Self {
        ModuleFingerprint {
            identity: identity.into(),
            content_hash,
            declared_version: None,
        }
    }

    pub fn with_version(mut self, version: PackageVersion) -> Self {
        self.declared_version = Some(version);
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn content_hash(&self) -> ContentHash {
        self.content_hash
    }

    pub fn declared_version(&self) -> Option<PackageVersion> {
        self.declared_version
    }

    /// Whether this observation should replace `other` for the same identity.
    ///
    /// A versioned entry beats an unversioned one; between two versioned
    /// entries the strictly greater version wins.
    pub fn supersedes(&self, other: &ModuleFingerprint) -> bool {
        match (self.declared_version, other.declared_version) {
            (Some(ours), Some(theirs)) => ours > theirs,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Fingerprints deduplicated by identity, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct FingerprintSet {
    entries: Vec<ModuleFingerprint>,
    index: HashMap<String, usize>,
}

impl FingerprintSet {
    pub fn new() -> Self {
        FingerprintSet::default()
    }

    /// Insert a fingerprint, merging with an existing entry of the same identity.
    ///
    /// The merged entry keeps the position of the first observation.
    pub fn insert(&mut self, fingerprint: ModuleFingerprint) {
        match self.index.get(fingerprint.identity()) {
            Some(&i) => {
                if fingerprint.supersedes(&self.entries[i]) {
                    self.entries[i] = fingerprint;
                }
            }
            None => {
                self.index
                    .insert(fingerprint.identity().to_string(), self.entries.len());
                self.entries.push(fingerprint);
            }
        }
    }

    pub fn get(&self, identity: &str) -> Option<&ModuleFingerprint> {
        self.index.get(identity).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.index.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ModuleFingerprint> {
        self.entries.iter()
    }
}

impl FromIterator<ModuleFingerprint> for FingerprintSet {
    fn from_iter<I: IntoIterator<Item = ModuleFingerprint>>(iter: I) -> Self {
        let mut set = FingerprintSet::new();
        for fingerprint in iter {
            set.insert(fingerprint);
        }
        set
    }
}

impl<'a> IntoIterator for &'a FingerprintSet {
    type Item = &'a ModuleFingerprint;
    type IntoIter = std::slice::Iter<'a, ModuleFingerprint>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// A module as reported by the host's discovery mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
    /// Origin-qualified name, unique among loaded modules.
    pub identity: String,
    pub content_hash: ContentHash,
    pub version: Option<PackageVersion>,
    pub path: PathBuf,
}

impl LoadedModule {
    pub fn fingerprint(&self) -> ModuleFingerprint {
        let fingerprint = ModuleFingerprint::new(self.identity.clone(), self.content_hash);
        match self.version {
            Some(version) => fingerprint.with_version(version),
            None => fingerprint,
        }
    }
}

/// Fingerprint set of a module list.
pub fn fingerprints(modules: &[LoadedModule]) -> FingerprintSet {
    modules.iter().map(LoadedModule::fingerprint).collect()
}

/// Supplies the modules the compiler should consume.
///
/// Implementations are queried from the worker thread.
pub trait ModuleSource: Send + Sync {
    fn modules(&self) -> Result<Vec<LoadedModule>>;
}

/// Discovers modules by globbing a directory.
///
/// The identity of `plugins/Foo/Bin/Foo.dll` under `plugins` is `Foo/Bin/Foo`,
/// so equally named files in different folders stay distinct.
#[derive(Debug, Clone)]
pub struct DirectoryModuleSource {
    root: PathBuf,
    patterns: Vec<String>,
}

impl DirectoryModuleSource {
    pub fn new(root: impl Into<PathBuf>, patterns: Vec<String>) -> Self {
        DirectoryModuleSource {
            root: root.into(),
            patterns,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn identity_of(&self, path: &Path) -> String {
        let relative = relative_path(&self.root, path);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        match relative.parent().map(to_slash) {
            Some(parent) if !parent.is_empty() => format!("{}/{}", parent, stem),
            _ => stem,
        }
    }
}

impl ModuleSource for DirectoryModuleSource {
    fn modules(&self) -> Result<Vec<LoadedModule>> {
        if !self.root.is_dir() {
            tracing::debug!("module directory {} does not exist", self.root.display());
            return Ok(Vec::new());
        }

        let paths: Vec<_> = glob_files(&self.root, &self.patterns)?
            .into_iter()
            .filter(|path| {
                // Line breaks would split cache and command line records.
                let name = path.to_string_lossy();
                let usable = !name.contains(['\n', '\r']);
                if !usable {
                    tracing::warn!("ignoring module with a line break in its path: {:?}", path);
                }
                usable
            })
            .collect();

        paths
            .par_iter()
            .map(|path| {
                let content_hash = content_id_file(path)?;
                let version = path
                    .file_stem()
                    .map(|s| s.to_string_lossy())
                    .filter(|s| s.contains(VERSION_DELIMITER))
                    .and_then(|s| PackageVersion::from_suffix(&s));

                Ok(LoadedModule {
                    identity: self.identity_of(path),
                    content_hash,
                    version,
                    path: path.clone(),
                })
            })
            .collect()
    }
}
