//! Hashing utilities for module content identities.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Compute the raw SHA256 digest of a file.
fn sha256_file_digest(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open file for hashing: {}", path.display()))?;

    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .with_context(|| format!("failed to read file for hashing: {}", path.display()))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_vec())
}

/// 128-bit content identity of a byte slice (truncated SHA256).
pub fn content_id_bytes(data: &[u8]) -> Uuid {
    truncate(&Sha256::digest(data))
}

/// 128-bit content identity of a file (truncated SHA256).
pub fn content_id_file(path: &Path) -> Result<Uuid> {
    Ok(truncate(&sha256_file_digest(path)?))
}

fn truncate(digest: &[u8]) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_content_id_is_digest_prefix() {
        let id = content_id_bytes(b"hello");
        assert_eq!(id.simple().to_string(), "2cf24dba5fb0a30e26e83b2ac5b9e29e");
    }

    #[test]
    fn test_content_id_file_matches_bytes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("module.dll");
        std::fs::write(&path, b"\x4d\x5a binary").unwrap();

        assert_eq!(
            content_id_file(&path).unwrap(),
            content_id_bytes(b"\x4d\x5a binary")
        );
        assert_ne!(content_id_bytes(b"a"), content_id_bytes(b"b"));
    }
}
