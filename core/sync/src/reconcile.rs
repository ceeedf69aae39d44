//! Two-way diff between the local snapshot and the remote tree.

use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use notesync_common::{ContentAddresser, EntryKind, LocalFileRecord, Result};

use crate::config::SyncConfig;
use crate::index::TreeIndex;
use crate::plan::{SyncPlan, TypeConflict};
use crate::policy::PathPolicy;
use crate::size::{SizeGuard, DEFAULT_MAX_FILE_SIZE};

/// Computes sync plans.
///
/// Pure: no I/O, no network. Policy exclusion means "never touch": an
/// excluded path is neither uploaded nor deleted remotely.
#[derive(Debug, Clone)]
pub struct Reconciler {
    max_file_size: u64,
}

impl Reconciler {
    /// Create a reconciler with a size threshold in bytes.
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    /// Create a reconciler from configuration.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.max_file_size)
    }

    /// Size threshold in bytes.
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Plan with exclusion `patterns`.
    ///
    /// # Errors
    /// - `Error::Policy` if any pattern is invalid; nothing is diffed
    pub fn plan<S: AsRef<str>>(
        &self,
        local_files: &[LocalFileRecord],
        remote_index: &TreeIndex,
        patterns: &[S],
    ) -> Result<SyncPlan> {
        let policy = PathPolicy::excluding(patterns)?;
        Ok(self.plan_with_policy(local_files, remote_index, &policy))
    }

    /// Plan with an already compiled policy.
    pub fn plan_with_policy(
        &self,
        local_files: &[LocalFileRecord],
        remote_index: &TreeIndex,
        policy: &PathPolicy,
    ) -> SyncPlan {
        let mut plan = SyncPlan {
            base: remote_index.head().cloned(),
            ..Default::default()
        };

        // Remote paths that must survive even though no eligible local file maps to them.
        let mut protected: BTreeSet<&str> = BTreeSet::new();
        // Remote directories a local file collides with; their content is kept.
        let mut protected_dirs: Vec<&str> = Vec::new();
        let mut eligible: BTreeMap<&str, &LocalFileRecord> = BTreeMap::new();

        for file in local_files {
            let path = file.path.as_str();

            if !policy.admits(path) {
                debug!("Excluded by policy: {}", path);
                continue;
            }
            if SizeGuard::is_oversized(file.size, self.max_file_size) {
                debug!("Oversized: {} ({} bytes)", path, file.size);
                protected.insert(path);
                continue;
            }
            if remote_index.is_directory(path) {
                plan.conflicts.push(TypeConflict {
                    path: path.to_string(),
                    local_kind: EntryKind::File,
                    remote_path: path.to_string(),
                    remote_kind: EntryKind::Directory,
                });
                protected_dirs.push(path);
                continue;
            }
            if let Some(ancestor) = remote_index.file_ancestor(path) {
                plan.conflicts.push(TypeConflict {
                    path: path.to_string(),
                    local_kind: EntryKind::File,
                    remote_path: ancestor.to_string(),
                    remote_kind: EntryKind::File,
                });
                protected.insert(ancestor);
                continue;
            }

            if eligible.insert(path, file).is_some() {
                warn!("Local snapshot contains {} more than once", path);
            }
        }

        plan.oversized = SizeGuard::find_oversized(local_files, self.max_file_size)
            .into_iter()
            .filter(|f| policy.admits(&f.path))
            .collect();

        // Hashing is pure, so it fans out across cores.
        let hashes: Vec<(&str, String)> = eligible
            .par_iter()
            .map(|(path, file)| (*path, ContentAddresser::hash(&file.content)))
            .collect();

        for (path, hash) in hashes {
            match remote_index.get(path) {
                None => plan.to_create.push(path.to_string()),
                Some(remote) if !remote.content_hash.eq_ignore_ascii_case(&hash) => {
                    plan.to_update.push(path.to_string())
                }
                Some(_) => continue,
            }
            plan.planned_hashes.insert(path.to_string(), hash);
        }

        for remote in remote_index.files() {
            let path = remote.path.as_str();
            if eligible.contains_key(path) || protected.contains(path) || !policy.admits(path) {
                continue;
            }
            if protected_dirs.iter().any(|dir| TreeIndex::is_below(path, dir)) {
                debug!("Kept inside conflicting directory: {}", path);
                continue;
            }
            plan.to_delete.push(path.to_string());
        }

        plan.to_create.sort();
        plan.to_update.sort();
        plan.to_delete.sort();

        for conflict in &plan.conflicts {
            warn!(
                "Type conflict: local file {} vs remote {} {}",
                conflict.path, conflict.remote_kind, conflict.remote_path
            );
        }
        if remote_index.is_truncated() {
            warn!("Remote listing was truncated; unseen remote files are left untouched");
        }

        let counts = plan.counts();
        info!(
            "Planned {} new, {} modified, {} deleted ({} oversized, {} conflicts)",
            counts.new,
            counts.modified,
            counts.deleted,
            plan.oversized.len(),
            plan.conflicts.len()
        );

        plan
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FILE_SIZE)
    }
}
