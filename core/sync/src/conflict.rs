//! Diagnostics for rejected commits.
//!
//! Nothing here resolves anything. When a commit is refused because the
//! branch moved, these helpers tell the user which planned paths were
//! touched remotely and whether the remote content already equals theirs.

use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use notesync_common::{join_path, normalize_path, ContentAddresser, RepoId, Result};
use notesync_storage::ContentProvider;

use crate::index::TreeIndex;
use crate::plan::SyncPlan;

/// A planned path whose remote content changed after planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DivergedPath {
    pub path: String,
    /// Remote hash the plan was computed against.
    pub planned: Option<String>,
    /// Remote hash now.
    pub current: Option<String>,
}

/// Remote content of one path compared with local bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RemoteComparison {
    Missing,
    Identical,
    Different { local_hash: String, remote_hash: String },
}

pub struct ConflictDiagnostics<R: ContentProvider + ?Sized> {
    remote: Arc<R>,
    repo: RepoId,
    branch: String,
    remote_root: String,
}

impl<R: ContentProvider + ?Sized> ConflictDiagnostics<R> {
    /// Create diagnostics for `branch` of `repo`.
    pub fn new(remote: Arc<R>, repo: RepoId, branch: impl Into<String>) -> Self {
        Self {
            remote,
            repo,
            branch: branch.into(),
            remote_root: String::new(),
        }
    }

    /// Set the remote folder local paths live under.
    pub fn with_remote_root(mut self, root: &str) -> Self {
        self.remote_root = normalize_path(root);
        self
    }

    /// Planned paths whose remote entry differs between the index the plan
    /// was built from and a fresh one.
    pub fn diverged_paths(plan: &SyncPlan, planned: &TreeIndex, fresh: &TreeIndex) -> Vec<DivergedPath> {
        plan.upserts()
            .chain(plan.to_delete())
            .filter_map(|path| {
                let before = planned.get(path).map(|e| e.content_hash.clone());
                let now = fresh.get(path).map(|e| e.content_hash.clone());
                (before != now).then(|| DivergedPath {
                    path: path.clone(),
                    planned: before,
                    current: now,
                })
            })
            .collect()
    }

    /// Fetch `path` from the branch head and compare it with `local`.
    pub async fn compare(&self, path: &str, local: &[u8]) -> Result<RemoteComparison> {
        let remote_path = join_path(&self.remote_root, path);
        let remote = self
            .remote
            .get_file_content(&self.repo, &remote_path, &self.branch)
            .await?;

        let comparison = match remote {
            None => RemoteComparison::Missing,
            Some(bytes) if bytes == local => RemoteComparison::Identical,
            Some(bytes) => RemoteComparison::Different {
                local_hash: ContentAddresser::hash(local),
                remote_hash: ContentAddresser::hash(&bytes),
            },
        };
        debug!("{} compared with remote: {:?}", remote_path, comparison);
        Ok(comparison)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::Reconciler;
    use notesync_common::RemoteTreeEntry;
    use notesync_storage::MemoryRemote;

    fn repo() -> RepoId {
        RepoId::new("alice", "garden").unwrap()
    }

    fn entry(path: &str, content: &str) -> RemoteTreeEntry {
        RemoteTreeEntry::file(
            path,
            ContentAddresser::hash(content.as_bytes()),
            content.len() as u64,
        )
    }

    #[test]
    fn test_diverged_paths() {
        let planned = TreeIndex::build(vec![entry("a.md", "x"), entry("gone.md", "g")]);
        let files = vec![
            notesync_common::LocalFileRecord::new("a.md", b"local".to_vec()),
            notesync_common::LocalFileRecord::new("b.md", b"new".to_vec()),
        ];
        let plan = Reconciler::default()
            .plan(&files, &planned, &[] as &[&str])
            .unwrap();

        let fresh = TreeIndex::build(vec![
            entry("a.md", "someone else"),
            entry("gone.md", "g"),
            entry("b.md", "also new"),
        ]);

        let diverged = ConflictDiagnostics::<MemoryRemote>::diverged_paths(&plan, &planned, &fresh);
        let paths: Vec<_> = diverged.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["b.md", "a.md"]);
        assert!(diverged[0].planned.is_none());
        assert!(diverged[0].current.is_some());
    }

    #[tokio::test]
    async fn test_compare_with_remote() {
        let remote = Arc::new(MemoryRemote::with_files(
            repo(),
            "main",
            &[("content/a.md", "same"), ("content/b.md", "theirs")],
        ));
        let diagnostics = ConflictDiagnostics::new(remote, repo(), "main").with_remote_root("content");

        assert_eq!(
            diagnostics.compare("a.md", b"same").await.unwrap(),
            RemoteComparison::Identical
        );
        assert_eq!(
            diagnostics.compare("missing.md", b"x").await.unwrap(),
            RemoteComparison::Missing
        );
        match diagnostics.compare("b.md", b"mine").await.unwrap() {
            RemoteComparison::Different {
                local_hash,
                remote_hash,
            } => {
                assert_eq!(local_hash, ContentAddresser::hash(b"mine"));
                assert_eq!(remote_hash, ContentAddresser::hash(b"theirs"));
            }
            other => panic!("unexpected comparison: {:?}", other),
        }
    }
}
