//! Collaborator traits for the local snapshot and the remote repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use notesync_common::{LocalFileRecord, RefHead, RemoteTreeEntry, RepoId, Result};

/// Flattened recursive listing of a remote tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreeListing {
    pub entries: Vec<RemoteTreeEntry>,
    /// The remote cut the listing short; deletions cannot be trusted.
    pub truncated: bool,
}

/// One path change applied on top of a base tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeChange {
    /// Full repository path.
    pub path: String,
    /// Blob id to store at `path`, or `None` to remove it.
    pub blob: Option<String>,
}

impl TreeChange {
    /// Point `path` at an uploaded blob.
    pub fn upsert(path: impl Into<String>, blob: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            blob: Some(blob.into()),
        }
    }

    /// Delete `path` from the base tree.
    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            blob: None,
        }
    }

    pub fn is_removal(&self) -> bool {
        self.blob.is_none()
    }
}

/// A published release of the remote project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub tag: String,
    pub name: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub body: Option<String>,
}

/// Supplies the current local file set.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Enumerate every local file with its exact bytes.
    ///
    /// # Postconditions
    /// - Paths are normalized, relative and unique
    /// - Reflects the on-disk state at call time
    async fn snapshot(&self) -> Result<Vec<LocalFileRecord>>;
}

/// Reads the bytes of one local path at commit time.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// # Errors
    /// - `NotFound` if the path no longer exists
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
}

/// Read access to branch heads and trees.
#[async_trait]
pub trait TreeProvider: Send + Sync {
    /// Get the provider name (e.g., "github", "memory").
    fn name(&self) -> &str;

    /// Resolve the commit and root tree a branch points at.
    ///
    /// # Errors
    /// - `NotFound` if the branch does not exist
    async fn head(&self, repo: &RepoId, branch: &str) -> Result<RefHead>;

    /// Recursively list a tree by its object id.
    async fn get_tree(&self, repo: &RepoId, tree: &str) -> Result<TreeListing>;
}

/// Read access to individual remote files.
///
/// Only used for conflict diagnostics, never for routine diffing.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Fetch the bytes of `path` at `reference` (branch or commit id).
    ///
    /// Returns `None` when the path does not exist at that reference.
    async fn get_file_content(
        &self,
        repo: &RepoId,
        path: &str,
        reference: &str,
    ) -> Result<Option<Vec<u8>>>;
}

/// Low-level object writes used to build one atomic commit.
///
/// Objects written by `create_blob`, `create_tree` and `create_commit`
/// stay invisible until `update_ref` links them.
#[async_trait]
pub trait CommitProvider: Send + Sync {
    /// Store a blob and return its object id.
    async fn create_blob(&self, repo: &RepoId, content: Vec<u8>) -> Result<String>;

    /// Create a tree from `base_tree` with `changes` applied.
    async fn create_tree(
        &self,
        repo: &RepoId,
        base_tree: &str,
        changes: Vec<TreeChange>,
    ) -> Result<String>;

    /// Create a commit object and return its id.
    async fn create_commit(
        &self,
        repo: &RepoId,
        message: &str,
        tree: &str,
        parents: Vec<String>,
    ) -> Result<String>;

    /// Move `branch` from `expected` to `commit` without forcing.
    ///
    /// Backends without an atomic compare-and-swap check `expected` just
    /// before the update and rely on the fast-forward rule for the rest.
    ///
    /// # Errors
    /// - `ConcurrentModification` if the branch no longer points at `expected`
    /// - `ReferenceUpdateFailure` if the update was refused for another reason
    async fn update_ref(
        &self,
        repo: &RepoId,
        branch: &str,
        commit: &str,
        expected: &str,
    ) -> Result<()>;
}

/// Release metadata, used by the update check.
#[async_trait]
pub trait ReleaseProvider: Send + Sync {
    async fn latest_release(&self, repo: &RepoId) -> Result<Option<Release>>;
}

/// Everything a sync run needs from the remote side.
pub trait RemoteRepository: TreeProvider + ContentProvider + CommitProvider {}

impl<T: TreeProvider + ContentProvider + CommitProvider + ?Sized> RemoteRepository for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_change_constructors() {
        let upsert = TreeChange::upsert("content/a.md", "abc");
        assert!(!upsert.is_removal());
        assert_eq!(upsert.blob.as_deref(), Some("abc"));

        let removal = TreeChange::remove("content/b.md");
        assert!(removal.is_removal());
    }

    #[test]
    fn test_release_serialization() {
        let release = Release {
            tag: "v1.2.0".to_string(),
            name: Some("1.2.0".to_string()),
            published_at: Some(Utc::now()),
            body: None,
        };

        let json = serde_json::to_string(&release).unwrap();
        let deserialized: Release = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, release);
    }
}
