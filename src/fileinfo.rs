//! Artifact identity: a repository path plus optional checksums.

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Metadata identifying one repository artifact.
///
/// The three digests are each either absent (not to be checked) or a byte
/// string to compare against. Values never change after construction;
/// updates replace the whole struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub(crate) path: String,
    pub(crate) size: u64,
    pub(crate) md5: Option<Vec<u8>>,
    pub(crate) sha1: Option<Vec<u8>>,
    pub(crate) sha256: Option<Vec<u8>>,
}

impl FileInfo {
    /// Compute the full identity of `data` stored at `path`: size plus all
    /// three digests.
    pub fn make(path: impl Into<String>, data: &[u8]) -> Self {
        Self {
            path: path.into(),
            size: data.len() as u64,
            md5: Some(Md5::digest(data).to_vec()),
            sha1: Some(Sha1::digest(data).to_vec()),
            sha256: Some(Sha256::digest(data).to_vec()),
        }
    }

    /// A query identity carrying only a path. It is [`Self::same`] as any
    /// other `FileInfo` sharing that path.
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: 0,
            md5: None,
            sha1: None,
            sha256: None,
        }
    }

    /// The identifying path string of the file.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Size of the file in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// True when `other` describes the same artifact: identical paths, and
    /// matching bytes for every digest that both sides carry. A digest
    /// present on only one side is not checked, which lets a path-only
    /// query match any stored identity.
    pub fn same(&self, other: &FileInfo) -> bool {
        self.path == other.path
            && digests_match(&self.md5, &other.md5)
            && digests_match(&self.sha1, &other.sha1)
            && digests_match(&self.sha256, &other.sha256)
    }
}

fn digests_match(a: &Option<Vec<u8>>, b: &Option<Vec<u8>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}
