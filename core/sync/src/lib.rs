//! notesync sync core
//!
//! This crate turns a local notes directory and a remote Git tree into
//! one atomic commit:
//! - Path policy and size guard deciding what is eligible
//! - Keyed remote tree index and the reconciler that diffs against it
//! - Batch committer with optimistic concurrency on the branch head
//! - Engine coordinating confirmation, retries of reads and sync state

pub mod commit;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod index;
pub mod plan;
pub mod policy;
pub mod reconcile;
pub mod retry;
pub mod size;
pub mod state;
pub mod update;

// Re-export main types
pub use commit::{
    BatchCommitter, CommitFailure, CommitFailureKind, CommitRequest, CommitResult, FileChange,
};
pub use config::SyncConfig;
pub use conflict::{ConflictDiagnostics, DivergedPath, RemoteComparison};
pub use engine::{AutoApprove, PlanPresenter, SyncEngine, SyncLocks, SyncOutcome, SyncReport};
pub use index::TreeIndex;
pub use notesync_common::ContentAddresser;
pub use plan::{PlanCounts, SyncPlan, TypeConflict};
pub use policy::{GlobPattern, PathPolicy, PatternValidation};
pub use reconcile::Reconciler;
pub use retry::{RetryConfig, RetryExecutor};
pub use size::{OversizedFile, SizeGuard, SizeReport, DEFAULT_MAX_FILE_SIZE};
pub use state::{SyncRecord, SyncState};
pub use update::{check_for_update, UpdateStatus};
