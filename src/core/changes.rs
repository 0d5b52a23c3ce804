//! Change detection between the loaded modules and the cached fingerprints.

use std::fmt::Write as _;

use serde::Serialize;

use crate::core::module::{ContentHash, FingerprintSet};
use crate::core::version::PackageVersion;

/// Comparison of one identity across the loaded and cached sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    pub identity: String,
    pub loaded: Option<ContentHash>,
    pub cached: Option<ContentHash>,
    /// Version of the loaded module, for display only.
    pub declared_version: Option<PackageVersion>,
}

impl ChangeRecord {
    /// Any hash mismatch, including presence on one side only.
    pub fn is_changed(&self) -> bool {
        self.loaded != self.cached
    }
}

/// Compare the loaded fingerprints against the cached ones.
///
/// Produces one record per identity in the union of both sets: loaded
/// identities first in their order, then identities only present in the
/// cache.
pub fn diff(loaded: &FingerprintSet, cached: &FingerprintSet) -> Vec<ChangeRecord> {
    let mut records = Vec::with_capacity(loaded.len().max(cached.len()));

    for fingerprint in loaded {
        records.push(ChangeRecord {
            identity: fingerprint.identity().to_string(),
            loaded: Some(fingerprint.content_hash()),
            cached: cached.get(fingerprint.identity()).map(|c| c.content_hash()),
            declared_version: fingerprint.declared_version(),
        });
    }

    for fingerprint in cached {
        if !loaded.contains(fingerprint.identity()) {
            records.push(ChangeRecord {
                identity: fingerprint.identity().to_string(),
                loaded: None,
                cached: Some(fingerprint.content_hash()),
                declared_version: None,
            });
        }
    }

    records
}

/// Whether any record differs. This alone decides if the compiler must run.
pub fn any_changed(records: &[ChangeRecord]) -> bool {
    records.iter().any(ChangeRecord::is_changed)
}

/// Render the records as an aligned table for the log.
pub fn format_report(records: &[ChangeRecord]) -> String {
    const HASH_WIDTH: usize = 36;

    let identity_width = records
        .iter()
        .map(|r| r.identity.len())
        .chain(std::iter::once("Module".len()))
        .max()
        .unwrap_or(0);
    let version_width = records
        .iter()
        .filter_map(|r| r.declared_version.map(|v| v.to_string().len()))
        .chain(std::iter::once("Version".len()))
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "  {} {:<iw$} {:<vw$} {:<hw$} {:<hw$}",
        " ",
        "Module",
        "Version",
        "Cached",
        "Loaded",
        iw = identity_width,
        vw = version_width,
        hw = HASH_WIDTH,
    );

    for record in records {
        let marker = if record.is_changed() { "x" } else { " " };
        let version = record
            .declared_version
            .map(|v| v.to_string())
            .unwrap_or_default();
        let cached = record.cached.map(|h| h.to_string()).unwrap_or_default();
        let loaded = record.loaded.map(|h| h.to_string()).unwrap_or_default();

        let line = format!(
            "  {} {:<iw$} {:<vw$} {:<hw$} {:<hw$}",
            marker,
            record.identity,
            version,
            cached,
            loaded,
            iw = identity_width,
            vw = version_width,
            hw = HASH_WIDTH,
        );
        let _ = writeln!(out, "{}", line.trim_end());
    }

    out
}
