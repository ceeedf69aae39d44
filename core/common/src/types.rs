//! Common types used throughout notesync.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A remote repository coordinate (`owner/repo`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId {
    owner: String,
    name: String,
}

impl RepoId {
    /// Create a new RepoId.
    ///
    /// # Errors
    /// - Returns error if owner or name is empty or contains `/`
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> crate::Result<Self> {
        let owner = owner.into();
        let name = name.into();
        for (label, value) in [("owner", &owner), ("repository", &name)] {
            if value.trim().is_empty() {
                return Err(crate::Error::InvalidInput(format!(
                    "Repository {} cannot be empty",
                    label
                )));
            }
            if value.contains('/') {
                return Err(crate::Error::InvalidInput(format!(
                    "Repository {} cannot contain '/': {}",
                    label, value
                )));
            }
        }
        Ok(Self { owner, name })
    }

    /// Parse an `owner/repo` slug.
    pub fn parse(slug: &str) -> crate::Result<Self> {
        match slug.split_once('/') {
            Some((owner, name)) => Self::new(owner, name),
            None => Err(crate::Error::InvalidInput(format!(
                "Expected owner/repo, got {:?}",
                slug
            ))),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key identifying a branch of this repository, used for locking and state.
    pub fn ref_key(&self, branch: &str) -> String {
        format!("{}/{}@{}", self.owner, self.name, branch)
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Normalize a repository-relative path.
///
/// Backslashes become `/`, leading `./` and `/` and any trailing `/` are
/// removed, and empty segments are collapsed. Case is preserved.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    unified
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a remote content root and a relative path.
pub fn join_path(root: &str, path: &str) -> String {
    let root = normalize_path(root);
    let path = normalize_path(path);
    if root.is_empty() {
        path
    } else if path.is_empty() {
        root
    } else {
        format!("{}/{}", root, path)
    }
}

/// One file of the local snapshot.
#[derive(Clone, PartialEq, Eq)]
pub struct LocalFileRecord {
    pub path: String,
    pub content: Vec<u8>,
    pub size: u64,
}

impl LocalFileRecord {
    /// Create a record, normalizing the path and deriving the size.
    pub fn new(path: impl AsRef<str>, content: Vec<u8>) -> Self {
        let size = content.len() as u64;
        Self {
            path: normalize_path(path.as_ref()),
            content,
            size,
        }
    }
}

impl fmt::Debug for LocalFileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalFileRecord")
            .field("path", &self.path)
            .field("size", &self.size)
            .finish()
    }
}

/// Kind of a remote tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::File => write!(f, "file"),
            EntryKind::Directory => write!(f, "directory"),
        }
    }
}

/// One entry of a flattened remote tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTreeEntry {
    pub path: String,
    pub kind: EntryKind,
    /// Git object id of the blob or tree.
    pub content_hash: String,
    /// Size in bytes (None for directories).
    pub size: Option<u64>,
}

impl RemoteTreeEntry {
    /// File entry with its blob id.
    pub fn file(path: impl AsRef<str>, content_hash: impl Into<String>, size: u64) -> Self {
        Self {
            path: normalize_path(path.as_ref()),
            kind: EntryKind::File,
            content_hash: content_hash.into(),
            size: Some(size),
        }
    }

    /// Directory entry with its tree id.
    pub fn directory(path: impl AsRef<str>, content_hash: impl Into<String>) -> Self {
        Self {
            path: normalize_path(path.as_ref()),
            kind: EntryKind::Directory,
            content_hash: content_hash.into(),
            size: None,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Where a branch currently points.
///
/// The commit id doubles as the optimistic-concurrency token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefHead {
    pub commit: String,
    pub tree: String,
}
