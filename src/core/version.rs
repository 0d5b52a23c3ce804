//! Version suffixes on package archive and extraction directory names.
//!
//! Entry names look like `com.unity.burst@1.6.4.tgz`: everything after the
//! last `@` is a dotted numeric version with up to four components. Names
//! without the delimiter parse as `0.0.0.0` and therefore sort lowest.

use std::cmp::Ordering;
use std::fmt;
use std::path::Path;

use serde::{Serialize, Serializer};

/// Delimiter introducing the version suffix in an entry name.
pub const VERSION_DELIMITER: char = '@';

/// A dotted numeric version with up to four components.
///
/// Missing components are treated as `0` for ordering, but the number of
/// components that were actually written is kept for display.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackageVersion {
    parts: [u64; 4],
    len: usize,
}

impl PackageVersion {
    /// The lowest version, `0.0.0.0`.
    pub const ZERO: PackageVersion = PackageVersion {
        parts: [0; 4],
        len: 4,
    };

    /// Create a four component version.
    pub fn new(major: u64, minor: u64, build: u64, revision: u64) -> Self {
        PackageVersion {
            parts: [major, minor, build, revision],
            len: 4,
        }
    }

    /// Parse a dotted numeric version such as `1.2` or `1.6.4.0`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }

        let mut parts = [0u64; 4];
        let mut len = 0;
        for component in s.split('.') {
            if len == parts.len() {
                return None;
            }
            parts[len] = component.parse().ok()?;
            len += 1;
        }

        Some(PackageVersion { parts, len })
    }

    /// Extract the version suffix of an entry name, if it has a parsable one.
    ///
    /// Non-numeric extensions (`.tgz`, `.tar.gz`, `.dll`) are stripped first.
    pub fn from_suffix(name: &str) -> Option<Self> {
        let name = strip_extensions(name);
        let (_, suffix) = name.rsplit_once(VERSION_DELIMITER)?;
        PackageVersion::parse(suffix)
    }

    /// Version of an entry name, falling back to [`PackageVersion::ZERO`].
    pub fn of_name(name: &str) -> Self {
        match PackageVersion::from_suffix(name) {
            Some(version) => version,
            None => {
                if name.contains(VERSION_DELIMITER) {
                    tracing::debug!("unparsable version suffix in `{}`", name);
                }
                PackageVersion::ZERO
            }
        }
    }

    /// Version of a filesystem entry, judged by its file name only.
    pub fn of_path(path: &Path) -> Self {
        path.file_name()
            .map(|name| PackageVersion::of_name(&name.to_string_lossy()))
            .unwrap_or(PackageVersion::ZERO)
    }

    /// The four components, zero-padded.
    pub fn parts(&self) -> [u64; 4] {
        self.parts
    }
}

/// Strip trailing extensions whose last dotted segment is not numeric.
///
/// `pkg@1.2.tar.gz` becomes `pkg@1.2`, while `pkg@1.10` is left alone.
fn strip_extensions(mut name: &str) -> &str {
    while let Some((stem, ext)) = name.rsplit_once('.') {
        if ext.is_empty() || ext.chars().all(|c| c.is_ascii_digit()) {
            break;
        }
        name = stem;
    }
    name
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for PackageVersion {}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

impl std::hash::Hash for PackageVersion {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self.len.max(1);
        for (i, part) in self.parts[..shown].iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", part)?;
        }
        Ok(())
    }
}

impl Serialize for PackageVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Select the entry with the greatest version suffix.
///
/// Ties are broken by input order: the first entry carrying the maximum
/// version wins. Returns `None` for empty input.
pub fn select_greatest<I, P>(entries: I) -> Option<P>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut best: Option<(PackageVersion, P)> = None;

    for entry in entries {
        let version = PackageVersion::of_path(entry.as_ref());
        match &best {
            Some((current, _)) if version <= *current => {}
            _ => best = Some((version, entry)),
        }
    }

    best.map(|(_, entry)| entry)
}
