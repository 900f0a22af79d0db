//! Content fingerprints used as cache keys and for change detection.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::SystemTime;

/// Hex-encoded blake3 digest of a file's content (and optionally its mtime)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of raw content alone
    pub fn compute(content: &[u8]) -> Self {
        Self(blake3::hash(content).to_hex().to_string())
    }

    /// Fingerprint of content plus a modification time in nanoseconds
    pub fn compute_with_mtime(content: &[u8], mtime_ns: Option<u128>) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(content);
        if let Some(mtime) = mtime_ns {
            hasher.update(&mtime.to_le_bytes());
        }
        Self(hasher.finalize().to_hex().to_string())
    }

    /// Read a file and fingerprint it; returns the content alongside
    pub fn from_file(path: &Path, include_mtime: bool) -> std::io::Result<(Self, String)> {
        let content = fs::read_to_string(path)?;
        let mtime = if include_mtime {
            modified_ns(path)
        } else {
            None
        };
        Ok((Self::compute_with_mtime(content.as_bytes(), mtime), content))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn modified_ns(path: &Path) -> Option<u128> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
}
