//! Atomic multi-file commit against a Git-like remote.
//!
//! A sync lands as exactly one commit. Blobs, the tree and the commit
//! object are written first; they stay unreachable until the final
//! non-forced reference update links them, so every failure before that
//! point leaves the branch untouched.

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use notesync_common::{join_path, normalize_path, ContentAddresser, Error, RefHead, RepoId, Result};
use notesync_storage::{CommitProvider, ContentSource, TreeChange, TreeProvider};

use crate::plan::SyncPlan;

/// Default number of blob uploads in flight.
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;

/// One path in a commit. `None` content is a tombstone.
#[derive(Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub content: Option<Vec<u8>>,
}

impl FileChange {
    /// Create or replace `path` with `content`.
    pub fn upsert(path: impl AsRef<str>, content: Vec<u8>) -> Self {
        Self {
            path: normalize_path(path.as_ref()),
            content: Some(content),
        }
    }

    /// Remove `path` from the tree.
    pub fn delete(path: impl AsRef<str>) -> Self {
        Self {
            path: normalize_path(path.as_ref()),
            content: None,
        }
    }

    /// Whether this change is a tombstone.
    pub fn is_delete(&self) -> bool {
        self.content.is_none()
    }
}

impl fmt::Debug for FileChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileChange")
            .field("path", &self.path)
            .field("size", &self.content.as_ref().map(Vec::len))
            .finish()
    }
}

/// Fully materialized commit payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    pub files: Vec<FileChange>,
    pub message: String,
}

impl CommitRequest {
    /// Read the content of every create/update path in `plan` from `source`.
    ///
    /// # Errors
    /// - `LocalSnapshotChanged` if a file vanished or its content no longer
    ///   hashes to what was planned
    pub async fn materialize<S: ContentSource + ?Sized>(
        plan: &SyncPlan,
        source: &S,
        message: impl Into<String>,
    ) -> Result<Self> {
        let mut files = Vec::with_capacity(plan.counts().total());

        for path in plan.upserts() {
            let content = match source.read(path).await {
                Ok(content) => content,
                Err(Error::NotFound(_)) => {
                    return Err(Error::LocalSnapshotChanged(format!("{} was removed", path)))
                }
                Err(e) => return Err(e),
            };

            if let Some(expected) = plan.planned_hash(path) {
                if !ContentAddresser::matches(&content, expected) {
                    return Err(Error::LocalSnapshotChanged(format!("{} was modified", path)));
                }
            }
            files.push(FileChange::upsert(path, content));
        }

        files.extend(plan.to_delete().iter().map(FileChange::delete));

        Ok(Self {
            files,
            message: message.into(),
        })
    }

    /// Number of blobs to upload.
    pub fn upload_count(&self) -> usize {
        self.files.iter().filter(|f| !f.is_delete()).count()
    }
}

/// Failure categories of one commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitFailureKind {
    /// The branch moved since planning.
    ConcurrentModification,
    /// Local files changed since planning.
    LocalSnapshotChanged,
    /// Blob, tree or commit creation failed. Only orphaned objects remain.
    PartialTreeFailure,
    /// Objects were created but the branch could not be moved.
    ReferenceUpdateFailure,
    TypeConflict,
    /// Transport failure before anything was written.
    Network,
    /// Credentials, permissions or bad input.
    Rejected,
}

/// Why a commit attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitFailure {
    pub kind: CommitFailureKind,
    pub message: String,
}

impl CommitFailure {
    /// Whether the same plan can simply be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            CommitFailureKind::PartialTreeFailure
                | CommitFailureKind::ReferenceUpdateFailure
                | CommitFailureKind::Network
        )
    }

    /// Whether the caller has to plan again before retrying.
    pub fn needs_replan(&self) -> bool {
        matches!(
            self.kind,
            CommitFailureKind::ConcurrentModification | CommitFailureKind::LocalSnapshotChanged
        )
    }
}

impl From<Error> for CommitFailure {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::ConcurrentModification { .. } => CommitFailureKind::ConcurrentModification,
            Error::LocalSnapshotChanged(_) => CommitFailureKind::LocalSnapshotChanged,
            Error::PartialTreeFailure(_) => CommitFailureKind::PartialTreeFailure,
            Error::ReferenceUpdateFailure(_) => CommitFailureKind::ReferenceUpdateFailure,
            Error::TypeConflict { .. } => CommitFailureKind::TypeConflict,
            Error::Network(_) | Error::Io(_) => CommitFailureKind::Network,
            _ => CommitFailureKind::Rejected,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for CommitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Terminal value of one commit attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitResult {
    pub success: bool,
    /// New head commit. `None` when nothing was committed.
    pub commit_hash: Option<String>,
    pub error: Option<CommitFailure>,
}

impl CommitResult {
    /// Successful result for `commit`.
    pub fn committed(commit: impl Into<String>) -> Self {
        Self {
            success: true,
            commit_hash: Some(commit.into()),
            error: None,
        }
    }

    /// Nothing to do.
    pub fn unchanged() -> Self {
        Self {
            success: true,
            commit_hash: None,
            error: None,
        }
    }

    /// Failed result classified from `err`.
    pub fn failed(err: Error) -> Self {
        Self {
            success: false,
            commit_hash: None,
            error: Some(err.into()),
        }
    }
}

/// Writes a plan to one branch as a single commit.
///
/// No retries happen here; a failed attempt is reported and left to the
/// caller.
pub struct BatchCommitter<R: CommitProvider + TreeProvider + ?Sized> {
    remote: Arc<R>,
    repo: RepoId,
    branch: String,
    remote_root: String,
    upload_concurrency: usize,
}

impl<R: CommitProvider + TreeProvider + ?Sized> BatchCommitter<R> {
    /// Create a committer for `branch` of `repo`.
    pub fn new(remote: Arc<R>, repo: RepoId, branch: impl Into<String>) -> Self {
        Self {
            remote,
            repo,
            branch: branch.into(),
            remote_root: String::new(),
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
        }
    }

    /// Prefix plan paths with `root` in the remote tree.
    pub fn with_remote_root(mut self, root: &str) -> Self {
        self.remote_root = normalize_path(root);
        self
    }

    /// Set how many blobs upload at once (at least one).
    pub fn with_upload_concurrency(mut self, concurrency: usize) -> Self {
        self.upload_concurrency = concurrency.max(1);
        self
    }

    /// Target branch.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Commit `plan`, reading file content from `source`.
    ///
    /// Never panics and never returns early with `Err`: every outcome is
    /// a `CommitResult`.
    pub async fn commit<S: ContentSource + ?Sized>(
        &self,
        plan: &SyncPlan,
        source: &S,
        message: &str,
    ) -> CommitResult {
        if plan.is_empty() {
            debug!("Empty plan; nothing to commit");
            return CommitResult::unchanged();
        }

        match self.try_commit(plan, source, message).await {
            Ok(commit) => CommitResult::committed(commit),
            Err(e) => {
                warn!("Commit to {} failed: {}", self.reference(), e);
                CommitResult::failed(e)
            }
        }
    }

    async fn try_commit<S: ContentSource + ?Sized>(
        &self,
        plan: &SyncPlan,
        source: &S,
        message: &str,
    ) -> Result<String> {
        let base = plan
            .base()
            .ok_or_else(|| Error::InvalidInput("Plan has no remote base".to_string()))?;

        let head = self.remote.head(&self.repo, &self.branch).await?;
        if head.commit != base.commit {
            return Err(Error::ConcurrentModification {
                reference: self.reference(),
                expected: base.commit.clone(),
                actual: head.commit,
            });
        }

        let request = CommitRequest::materialize(plan, source, message).await?;
        self.commit_request(&request, base).await
    }

    /// Write `request` on top of `base` and move the branch to it.
    ///
    /// # Errors
    /// - `PartialTreeFailure` if a blob, the tree or the commit could not be created
    /// - `ConcurrentModification` if the branch no longer points at `base`
    /// - `ReferenceUpdateFailure` for any other reference update failure
    pub async fn commit_request(&self, request: &CommitRequest, base: &RefHead) -> Result<String> {
        let changes = self.write_blobs(request).await.map_err(into_partial)?;
        debug!(
            "Uploaded {} blobs, {} removals",
            request.upload_count(),
            changes.len() - request.upload_count()
        );

        let tree = self
            .remote
            .create_tree(&self.repo, &base.tree, changes)
            .await
            .map_err(into_partial)?;

        let commit = self
            .remote
            .create_commit(&self.repo, &request.message, &tree, vec![base.commit.clone()])
            .await
            .map_err(into_partial)?;

        match self
            .remote
            .update_ref(&self.repo, &self.branch, &commit, &base.commit)
            .await
        {
            Ok(()) => {
                info!("Committed {} to {}", commit, self.reference());
                Ok(commit)
            }
            Err(e @ Error::ConcurrentModification { .. }) => Err(e),
            Err(e @ Error::ReferenceUpdateFailure(_)) => Err(e),
            Err(e) => Err(Error::ReferenceUpdateFailure(e.to_string())),
        }
    }

    /// Upload every non-tombstone file and return the tree changes.
    async fn write_blobs(&self, request: &CommitRequest) -> Result<Vec<TreeChange>> {
        let uploads = request
            .files
            .iter()
            .filter_map(|f| f.content.as_ref().map(|content| (f.path.as_str(), content)));

        let mut changes: Vec<TreeChange> = stream::iter(uploads)
            .map(|(path, content)| self.write_blob(path, content))
            .buffered(self.upload_concurrency)
            .try_collect()
            .await?;

        changes.extend(
            request
                .files
                .iter()
                .filter(|f| f.is_delete())
                .map(|f| TreeChange::remove(self.remote_path(&f.path))),
        );
        Ok(changes)
    }

    async fn write_blob(&self, path: &str, content: &[u8]) -> Result<TreeChange> {
        let expected = ContentAddresser::hash(content);
        let id = self.remote.create_blob(&self.repo, content.to_vec()).await?;
        if !id.eq_ignore_ascii_case(&expected) {
            return Err(Error::PartialTreeFailure(format!(
                "Blob id mismatch for {}: expected {}, got {}",
                path, expected, id
            )));
        }
        Ok(TreeChange::upsert(self.remote_path(path), id))
    }

    fn remote_path(&self, path: &str) -> String {
        join_path(&self.remote_root, path)
    }

    fn reference(&self) -> String {
        self.repo.ref_key(&self.branch)
    }
}

fn into_partial(err: Error) -> Error {
    match err {
        Error::PartialTreeFailure(_)
        | Error::TypeConflict { .. }
        | Error::Authentication(_)
        | Error::PermissionDenied(_) => err,
        other => Error::PartialTreeFailure(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::TreeIndex;
    use crate::reconcile::Reconciler;
    use notesync_storage::{MemoryRemote, MemorySource, Operation};

    const BRANCH: &str = "main";

    fn repo() -> RepoId {
        RepoId::new("alice", "garden").unwrap()
    }

    async fn plan_for(remote: &MemoryRemote, source: &MemorySource, root: &str) -> SyncPlan {
        let head = remote.head(&repo(), BRANCH).await.unwrap();
        let listing = remote.get_tree(&repo(), &head.tree).await.unwrap();
        let index = TreeIndex::build_scoped(listing.entries, root).with_head(head);
        Reconciler::default()
            .plan(&source.records(), &index, &[] as &[&str])
            .unwrap()
    }

    #[tokio::test]
    async fn test_commit_lands_single_commit() {
        let remote = Arc::new(MemoryRemote::with_files(
            repo(),
            BRANCH,
            &[("a.md", "x"), ("c.md", "z")],
        ));
        let source = MemorySource::from_files(&[("a.md", "x"), ("b.md", "y")]);
        let plan = plan_for(&remote, &source, "").await;

        let committer = BatchCommitter::new(remote.clone(), repo(), BRANCH);
        let result = committer.commit(&plan, &source, "Sync notes").await;

        assert!(result.success, "{:?}", result.error);
        assert!(result.commit_hash.is_some());
        assert_eq!(remote.calls(Operation::CreateCommit).await, 1);
        assert_eq!(remote.calls(Operation::UpdateRef).await, 1);

        let files = remote.files(BRANCH).await.unwrap();
        let paths: Vec<_> = files.keys().cloned().collect();
        assert_eq!(paths, vec!["a.md", "b.md"]);
        assert_eq!(remote.head_message(BRANCH).await.as_deref(), Some("Sync notes"));
    }

    #[tokio::test]
    async fn test_empty_plan_makes_no_remote_calls() {
        let remote = Arc::new(MemoryRemote::new(repo(), BRANCH));
        let committer = BatchCommitter::new(remote.clone(), repo(), BRANCH);

        let result = committer
            .commit(&SyncPlan::default(), &MemorySource::new(), "noop")
            .await;

        assert_eq!(result, CommitResult::unchanged());
        assert_eq!(remote.calls(Operation::Head).await, 0);
        assert_eq!(remote.calls(Operation::CreateBlob).await, 0);
    }

    #[tokio::test]
    async fn test_stale_base_writes_nothing() {
        let remote = Arc::new(MemoryRemote::with_files(repo(), BRANCH, &[("a.md", "x")]));
        let source = MemorySource::from_files(&[("a.md", "changed")]);
        let plan = plan_for(&remote, &source, "").await;

        remote
            .push_files(BRANCH, &[("other.md", "from elsewhere")], &[])
            .await
            .unwrap();

        let committer = BatchCommitter::new(remote.clone(), repo(), BRANCH);
        let result = committer.commit(&plan, &source, "Sync").await;

        assert!(!result.success);
        let failure = result.error.unwrap();
        assert_eq!(failure.kind, CommitFailureKind::ConcurrentModification);
        assert!(failure.needs_replan());
        assert_eq!(remote.calls(Operation::CreateBlob).await, 0);
        assert_eq!(remote.calls(Operation::CreateTree).await, 0);
        assert_eq!(remote.calls(Operation::CreateCommit).await, 0);
        assert_eq!(remote.calls(Operation::UpdateRef).await, 0);
    }

    #[tokio::test]
    async fn test_local_change_after_planning() {
        let remote = Arc::new(MemoryRemote::new(repo(), BRANCH));
        let mut source = MemorySource::from_files(&[("a.md", "planned")]);
        let plan = plan_for(&remote, &source, "").await;

        source.insert("a.md", "edited while confirming");

        let committer = BatchCommitter::new(remote.clone(), repo(), BRANCH);
        let result = committer.commit(&plan, &source, "Sync").await;

        let failure = result.error.unwrap();
        assert_eq!(failure.kind, CommitFailureKind::LocalSnapshotChanged);
        assert_eq!(remote.calls(Operation::CreateBlob).await, 0);
    }

    #[tokio::test]
    async fn test_tree_failure_leaves_branch_untouched() {
        let remote = Arc::new(MemoryRemote::with_files(repo(), BRANCH, &[("a.md", "x")]));
        let source = MemorySource::from_files(&[("a.md", "x"), ("b.md", "y")]);
        let plan = plan_for(&remote, &source, "").await;
        let before = remote.head(&repo(), BRANCH).await.unwrap();

        remote.fail_next(Operation::CreateTree).await;
        let committer = BatchCommitter::new(remote.clone(), repo(), BRANCH);
        let result = committer.commit(&plan, &source, "Sync").await;

        let failure = result.error.unwrap();
        assert_eq!(failure.kind, CommitFailureKind::PartialTreeFailure);
        assert!(failure.is_retryable());
        assert_eq!(remote.calls(Operation::UpdateRef).await, 0);
        assert_eq!(remote.head(&repo(), BRANCH).await.unwrap(), before);

        // The same plan still applies once the remote recovers.
        let retry = committer.commit(&plan, &source, "Sync").await;
        assert!(retry.success);
    }

    #[tokio::test]
    async fn test_ref_failure_is_reported() {
        let remote = Arc::new(MemoryRemote::new(repo(), BRANCH));
        let source = MemorySource::from_files(&[("a.md", "x")]);
        let plan = plan_for(&remote, &source, "").await;

        remote.fail_next(Operation::UpdateRef).await;
        let committer = BatchCommitter::new(remote.clone(), repo(), BRANCH);
        let result = committer.commit(&plan, &source, "Sync").await;

        assert_eq!(
            result.error.unwrap().kind,
            CommitFailureKind::ReferenceUpdateFailure
        );
        assert!(remote.files(BRANCH).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remote_root_prefix() {
        let remote = Arc::new(MemoryRemote::with_files(
            repo(),
            BRANCH,
            &[("quartz.config.ts", "cfg"), ("content/old.md", "o")],
        ));
        let source = MemorySource::from_files(&[("new.md", "n")]);
        let plan = plan_for(&remote, &source, "content").await;
        assert_eq!(plan.to_delete(), &["old.md".to_string()]);

        let committer =
            BatchCommitter::new(remote.clone(), repo(), BRANCH).with_remote_root("content/");
        let result = committer.commit(&plan, &source, "Sync").await;
        assert!(result.success);

        let paths: Vec<_> = remote.files(BRANCH).await.unwrap().into_keys().collect();
        assert_eq!(paths, vec!["content/new.md", "quartz.config.ts"]);
    }

    #[test]
    fn test_failure_classification() {
        let failure = CommitFailure::from(Error::Authentication("bad token".to_string()));
        assert_eq!(failure.kind, CommitFailureKind::Rejected);
        assert!(!failure.is_retryable());
        assert!(!failure.needs_replan());

        let failure = CommitFailure::from(Error::Network("reset".to_string()));
        assert!(failure.is_retryable());
    }

    #[test]
    fn test_file_change_debug_omits_content() {
        let change = FileChange::upsert("./a.md", b"secret".to_vec());
        assert_eq!(change.path, "a.md");
        let debug = format!("{:?}", change);
        assert!(!debug.contains("secret"));
    }
}
