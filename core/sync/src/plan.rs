//! The computed set of remote changes.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

use notesync_common::{EntryKind, RefHead};

use crate::size::OversizedFile;

/// Change counts shown before confirming a sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCounts {
    pub new: usize,
    pub modified: usize,
    pub deleted: usize,
}

impl PlanCounts {
    /// Sum of all counts.
    pub fn total(&self) -> usize {
        self.new + self.modified + self.deleted
    }
}

/// A path that is a file on one side and a directory on the other.
///
/// Excluded from the plan and left for the user to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeConflict {
    /// Local path involved.
    pub path: String,
    /// What the path is locally.
    pub local_kind: EntryKind,
    /// Remote path whose kind clashes (the path itself or an ancestor).
    pub remote_path: String,
    pub remote_kind: EntryKind,
}

/// Creates, updates and deletes needed to make the remote match local.
///
/// Immutable once produced. Lists are sorted. Serializes with its derived
/// `counts`.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub(crate) to_create: Vec<String>,
    pub(crate) to_update: Vec<String>,
    pub(crate) to_delete: Vec<String>,
    /// Content hash each create/update path had when planned.
    pub(crate) planned_hashes: BTreeMap<String, String>,
    pub(crate) base: Option<RefHead>,
    pub(crate) oversized: Vec<OversizedFile>,
    pub(crate) conflicts: Vec<TypeConflict>,
}

impl SyncPlan {
    /// Paths new on the remote.
    pub fn to_create(&self) -> &[String] {
        &self.to_create
    }

    /// Paths whose remote content changes.
    pub fn to_update(&self) -> &[String] {
        &self.to_update
    }

    /// Remote paths to remove.
    pub fn to_delete(&self) -> &[String] {
        &self.to_delete
    }

    /// Counts derived from the change lists.
    pub fn counts(&self) -> PlanCounts {
        PlanCounts {
            new: self.to_create.len(),
            modified: self.to_update.len(),
            deleted: self.to_delete.len(),
        }
    }

    /// No creates, updates or deletes. Reports do not count.
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Remote head the plan was computed against.
    pub fn base(&self) -> Option<&RefHead> {
        self.base.as_ref()
    }

    /// Hash `path` had when the plan was made.
    pub fn planned_hash(&self, path: &str) -> Option<&str> {
        self.planned_hashes.get(path).map(String::as_str)
    }

    /// Local files skipped for size.
    pub fn oversized(&self) -> &[OversizedFile] {
        &self.oversized
    }

    /// File/directory conflicts left out of the plan.
    pub fn conflicts(&self) -> &[TypeConflict] {
        &self.conflicts
    }

    /// Paths whose content must be uploaded, creates first.
    pub fn upserts(&self) -> impl Iterator<Item = &String> {
        self.to_create.iter().chain(self.to_update.iter())
    }
}

impl Serialize for SyncPlan {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("SyncPlan", 8)?;
        state.serialize_field("to_create", &self.to_create)?;
        state.serialize_field("to_update", &self.to_update)?;
        state.serialize_field("to_delete", &self.to_delete)?;
        state.serialize_field("counts", &self.counts())?;
        state.serialize_field("planned_hashes", &self.planned_hashes)?;
        state.serialize_field("base", &self.base)?;
        state.serialize_field("oversized", &self.oversized)?;
        state.serialize_field("conflicts", &self.conflicts)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_match_lists() {
        let plan = SyncPlan {
            to_create: vec!["a.md".to_string(), "b.md".to_string()],
            to_update: vec!["c.md".to_string()],
            ..Default::default()
        };

        let counts = plan.counts();
        assert_eq!(counts.new, 2);
        assert_eq!(counts.modified, 1);
        assert_eq!(counts.deleted, 0);
        assert_eq!(counts.total(), 3);
        assert!(!plan.is_empty());
        assert_eq!(plan.upserts().count(), 3);
    }

    #[test]
    fn test_reports_do_not_make_plan_non_empty() {
        let plan = SyncPlan {
            oversized: vec![OversizedFile {
                path: "big.pdf".to_string(),
                size: 20,
                formatted_size: "20 B".to_string(),
            }],
            ..Default::default()
        };
        assert!(plan.is_empty());
        assert_eq!(plan.counts(), PlanCounts::default());
    }

    #[test]
    fn test_json_includes_counts() {
        let plan = SyncPlan {
            to_create: vec!["a.md".to_string()],
            to_delete: vec!["old.md".to_string(), "older.md".to_string()],
            ..Default::default()
        };

        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["counts"]["new"], 1);
        assert_eq!(json["counts"]["modified"], 0);
        assert_eq!(json["counts"]["deleted"], 2);
        assert_eq!(json["to_delete"][1], "older.md");
        assert!(json["base"].is_null());
    }
}
