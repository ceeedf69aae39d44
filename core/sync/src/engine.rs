//! Core sync engine that orchestrates one sync attempt.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use notesync_common::{Error, RepoId, Result};
use notesync_storage::{ContentSource, RemoteRepository, SnapshotProvider, TreeProvider};

use crate::commit::{BatchCommitter, CommitFailure, CommitFailureKind};
use crate::config::SyncConfig;
use crate::conflict::{ConflictDiagnostics, DivergedPath};
use crate::index::TreeIndex;
use crate::plan::{PlanCounts, SyncPlan};
use crate::policy::PathPolicy;
use crate::reconcile::Reconciler;
use crate::retry::{RetryConfig, RetryExecutor};
use crate::state::SyncState;

/// Asks the user whether a plan should be committed.
#[async_trait]
pub trait PlanPresenter: Send + Sync {
    /// Show `plan` and return whether to proceed.
    async fn present_plan(&self, plan: &SyncPlan) -> bool;
}

/// Confirms every plan without asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl PlanPresenter for AutoApprove {
    async fn present_plan(&self, _plan: &SyncPlan) -> bool {
        true
    }
}

/// How a sync attempt ended.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Remote already matches local.
    UpToDate,
    /// The presenter declined the plan.
    Declined,
    Committed { commit: String, counts: PlanCounts },
    Failed {
        failure: CommitFailure,
        /// Planned paths changed remotely, when the branch moved.
        diverged: Vec<DivergedPath>,
    },
}

/// Result of a sync attempt.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub plan: SyncPlan,
    pub outcome: SyncOutcome,
    pub duration: Duration,
}

impl SyncReport {
    /// Whether the attempt ended without a commit failure.
    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, SyncOutcome::Failed { .. })
    }
}

/// One lock per `owner/repo@branch`.
#[derive(Debug, Default)]
pub struct SyncLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SyncLocks {
    /// Create an empty lock registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `reference` without waiting.
    ///
    /// # Errors
    /// - `SyncInProgress` if another attempt holds it
    pub async fn acquire(&self, reference: &str) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(reference.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.try_lock_owned()
            .map_err(|_| Error::SyncInProgress(reference.to_string()))
    }
}

/// Main sync engine for one configured notes directory and branch.
pub struct SyncEngine<R: RemoteRepository + ?Sized> {
    remote: Arc<R>,
    config: SyncConfig,
    repo: RepoId,
    policy: PathPolicy,
    reconciler: Reconciler,
    retry_executor: RetryExecutor,
    state: Arc<RwLock<SyncState>>,
    locks: Arc<SyncLocks>,
}

impl<R: RemoteRepository + ?Sized> SyncEngine<R> {
    /// Create an engine. The configuration is validated first.
    pub fn new(remote: Arc<R>, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let repo = config.repo_id()?;
        let policy = config.policy()?;

        Ok(Self {
            remote,
            repo,
            policy,
            reconciler: Reconciler::from_config(&config),
            retry_executor: RetryExecutor::new(RetryConfig::new(config.max_retries)),
            state: Arc::new(RwLock::new(SyncState::new())),
            locks: Arc::new(SyncLocks::new()),
            config,
        })
    }

    /// Start from previously persisted state.
    pub fn with_state(mut self, state: SyncState) -> Self {
        self.state = Arc::new(RwLock::new(state));
        self
    }

    /// Share a lock registry with other engines in the same process.
    pub fn with_locks(mut self, locks: Arc<SyncLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// Set the retry policy for remote reads.
    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry_executor = RetryExecutor::new(config);
        self
    }

    /// Get the sync configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Shared handle to the sync state.
    pub fn state(&self) -> Arc<RwLock<SyncState>> {
        self.state.clone()
    }

    fn reference(&self) -> String {
        self.repo.ref_key(&self.config.branch)
    }

    /// Conflict diagnostics for the configured branch.
    pub fn diagnostics(&self) -> ConflictDiagnostics<R> {
        ConflictDiagnostics::new(self.remote.clone(), self.repo.clone(), &self.config.branch)
            .with_remote_root(&self.config.remote_root())
    }

    /// Read the branch head and build the index of the content root.
    ///
    /// Reads are retried on transient errors.
    pub async fn fetch_index(&self) -> Result<TreeIndex> {
        let branch = self.config.branch.as_str();
        let head = self
            .retry_executor
            .execute("head", || self.remote.head(&self.repo, branch))
            .await?;

        if let Some(last) = self.state.read().await.last_head(&self.reference()) {
            if last != head.commit {
                warn!(
                    "{} moved since the last sync ({} -> {}); the remote wins",
                    self.reference(),
                    last,
                    head.commit
                );
            }
        }

        let tree = head.tree.clone();
        let listing = self
            .retry_executor
            .execute("get_tree", || self.remote.get_tree(&self.repo, &tree))
            .await?;
        debug!(
            "Fetched {} entries from {} at {}",
            listing.entries.len(),
            self.remote.name(),
            head.commit
        );

        Ok(TreeIndex::build_scoped(listing.entries, &self.config.remote_root())
            .with_head(head)
            .with_truncated(listing.truncated))
    }

    async fn plan_with_index<S: SnapshotProvider + ?Sized>(
        &self,
        local: &S,
    ) -> Result<(SyncPlan, TreeIndex)> {
        let files = local.snapshot().await?;
        let index = self.fetch_index().await?;
        let plan = self.reconciler.plan_with_policy(&files, &index, &self.policy);
        Ok((plan, index))
    }

    /// Compute the plan without committing anything.
    pub async fn plan<S: SnapshotProvider + ?Sized>(&self, local: &S) -> Result<SyncPlan> {
        Ok(self.plan_with_index(local).await?.0)
    }

    /// Plan, confirm through `presenter`, and commit.
    ///
    /// `message` overrides the configured commit message template.
    ///
    /// # Errors
    /// - `SyncInProgress` if another attempt on the same branch is running
    /// - errors reading the local snapshot or the remote tree
    ///
    /// Commit failures are not errors; they are reported in the outcome.
    pub async fn sync<L, P>(&self, local: &L, presenter: &P, message: Option<&str>) -> Result<SyncReport>
    where
        L: SnapshotProvider + ContentSource + ?Sized,
        P: PlanPresenter + ?Sized,
    {
        let reference = self.reference();
        let _guard = self.locks.acquire(&reference).await?;
        let start = Instant::now();

        info!("Starting sync of {}", reference);
        let (plan, index) = self.plan_with_index(local).await?;

        let outcome = if plan.is_empty() {
            info!("{} is up to date", reference);
            if let Some(head) = index.head() {
                self.state
                    .write()
                    .await
                    .record(&reference, &head.commit, PlanCounts::default());
            }
            SyncOutcome::UpToDate
        } else if !presenter.present_plan(&plan).await {
            info!("Sync declined");
            SyncOutcome::Declined
        } else {
            let counts = plan.counts();
            let message = message
                .map(str::to_string)
                .unwrap_or_else(|| self.config.render_commit_message(&counts));

            let committer = BatchCommitter::new(self.remote.clone(), self.repo.clone(), &self.config.branch)
                .with_remote_root(&self.config.remote_root());
            let result = committer.commit(&plan, local, &message).await;

            match (result.commit_hash, result.error) {
                (Some(commit), _) => {
                    self.state.write().await.record(&reference, &commit, counts);
                    SyncOutcome::Committed { commit, counts }
                }
                (None, Some(failure)) => {
                    let diverged = if failure.kind == CommitFailureKind::ConcurrentModification {
                        self.diverged_paths(&plan, &index).await
                    } else {
                        Vec::new()
                    };
                    SyncOutcome::Failed { failure, diverged }
                }
                (None, None) => SyncOutcome::UpToDate,
            }
        };

        let duration = start.elapsed();
        info!("Sync of {} finished in {:?}", reference, duration);
        Ok(SyncReport {
            plan,
            outcome,
            duration,
        })
    }

    async fn diverged_paths(&self, plan: &SyncPlan, planned: &TreeIndex) -> Vec<DivergedPath> {
        match self.fetch_index().await {
            Ok(fresh) => ConflictDiagnostics::<R>::diverged_paths(plan, planned, &fresh),
            Err(e) => {
                warn!("Could not re-read {} for diagnostics: {}", self.reference(), e);
                Vec::new()
            }
        }
    }
}
