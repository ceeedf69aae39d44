//! Sync state tracking and persistence.
//!
//! The remote is authoritative. The recorded head only tells the user
//! that somebody else committed since the last sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use notesync_common::{Error, Result};

use crate::plan::PlanCounts;

/// The last successful sync of one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Head commit right after the sync.
    pub commit: String,
    pub synced_at: DateTime<Utc>,
    pub counts: PlanCounts,
}

/// Last known heads keyed by `owner/repo@branch`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    heads: BTreeMap<String, SyncRecord>,
}

impl SyncState {
    /// Create empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last successful sync of `reference`.
    pub fn last_sync(&self, reference: &str) -> Option<&SyncRecord> {
        self.heads.get(reference)
    }

    /// Head commit recorded for `reference`.
    pub fn last_head(&self, reference: &str) -> Option<&str> {
        self.heads.get(reference).map(|r| r.commit.as_str())
    }

    /// Record a successful sync of `reference` that left it at `commit`.
    pub fn record(&mut self, reference: impl Into<String>, commit: impl Into<String>, counts: PlanCounts) {
        self.heads.insert(
            reference.into(),
            SyncRecord {
                commit: commit.into(),
                synced_at: Utc::now(),
                counts,
            },
        );
    }

    /// All references with a recorded sync.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.heads.keys().map(String::as_str)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Parse state from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Read state from `path`. A missing file is an empty state.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(json) => Self::from_json(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No sync state at {}", path.display());
                Ok(Self::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write state to `path` through a temporary file and a rename.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, self.to_json()?).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}
