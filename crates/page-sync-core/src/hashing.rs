//! Content digests and file fingerprints.
//!
//! Equality of documents is judged by the SHA-256 of their bytes. Directories
//! get an aggregate digest derived from every descendant file's identity, so
//! any change below a directory changes the directory's digest.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::fs::FileStat;

/// A content hash (lowercase SHA-256 hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Compute hash from content bytes.
    pub fn from_bytes(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest plus the size/mtime pair observed when the file was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub digest: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
}

impl Fingerprint {
    pub fn new(content: &[u8], stat: &FileStat) -> Self {
        Self {
            digest: ContentHash::from_bytes(content).into_string(),
            size: stat.size,
            mod_time: millis_to_datetime(stat.mtime_millis),
        }
    }
}

/// Convert a filesystem mtime (ms since epoch) to a UTC timestamp.
pub fn millis_to_datetime(millis: u64) -> DateTime<Utc> {
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_default()
}

/// Aggregate digest of a directory over all transitively contained files.
///
/// `files` yields `(path, digest)` pairs for the whole sync root; only paths
/// under `dir/` take part. Pairs are sorted first so the result does not
/// depend on scan order.
pub fn aggregate_digest<'a, I>(dir: &str, files: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let prefix = format!("{}/", dir.trim_matches('/'));
    let mut members: Vec<(&str, &str)> = files
        .into_iter()
        .filter(|(path, _)| path.starts_with(&prefix))
        .collect();
    members.sort_unstable();

    let mut hasher = Sha256::new();
    for (path, digest) in members {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(digest.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(size: u64, mtime_millis: u64) -> FileStat {
        FileStat {
            mtime_millis,
            size,
            is_dir: false,
        }
    }

    #[test]
    fn test_content_hash_deterministic() {
        let hash1 = ContentHash::from_bytes(b"hello world");
        let hash2 = ContentHash::from_bytes(b"hello world");
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.as_str().len(), 64);
    }

    #[test]
    fn test_single_byte_change_changes_hash() {
        let hash1 = ContentHash::from_bytes(b"# Guide\n");
        let hash2 = ContentHash::from_bytes(b"# Guide!\n");
        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_fingerprint_carries_stat() {
        let fp = Fingerprint::new(b"abc", &stat(3, 1_700_000_000_000));
        assert_eq!(fp.size, 3);
        assert_eq!(fp.mod_time.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_aggregate_ignores_outside_files_and_order() {
        let a = [("docs/a.md", "1"), ("docs/sub/b.md", "2"), ("other.md", "3")];
        let b = [("docs/sub/b.md", "2"), ("other.md", "9"), ("docs/a.md", "1")];
        assert_eq!(aggregate_digest("docs", a), aggregate_digest("docs", b));
    }

    #[test]
    fn test_aggregate_changes_with_nested_descendant() {
        let before = [("docs/a.md", "1"), ("docs/sub/b.md", "2")];
        let after = [("docs/a.md", "1"), ("docs/sub/b.md", "3")];
        assert_ne!(aggregate_digest("docs", before), aggregate_digest("docs", after));
    }

    #[test]
    fn test_aggregate_prefix_is_segment_aware() {
        // "docs-old/x.md" is not inside "docs"
        let files = [("docs/a.md", "1"), ("docs-old/x.md", "2")];
        let only = [("docs/a.md", "1")];
        assert_eq!(aggregate_digest("docs", files), aggregate_digest("docs", only));
    }
}
