//! Git-compatible content addressing.
//!
//! Remote tree entries carry Git object ids, so hashing local bytes the
//! same way lets the reconciler detect changes without downloading
//! anything.

use sha1::{Digest, Sha1};
use std::fmt;

/// Git object kinds that can be addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
}

impl ObjectKind {
    fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Tree => "tree",
            ObjectKind::Commit => "commit",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Computes Git object ids offline.
pub struct ContentAddresser;

impl ContentAddresser {
    /// Object id of `content` stored as a blob.
    pub fn hash(content: &[u8]) -> String {
        Self::hash_object(ObjectKind::Blob, content)
    }

    /// Object id of `content` stored as an object of `kind`.
    ///
    /// The digest covers `"<kind> <len>\0"` followed by the raw bytes.
    pub fn hash_object(kind: ObjectKind, content: &[u8]) -> String {
        let mut hasher = Sha1::new();
        hasher.update(format!("{} {}\0", kind, content.len()).as_bytes());
        hasher.update(content);
        format!("{:x}", hasher.finalize())
    }

    /// Whether `content` hashes to `expected` (case-insensitive hex).
    pub fn matches(content: &[u8], expected: &str) -> bool {
        Self::hash(content).eq_ignore_ascii_case(expected)
    }
}
