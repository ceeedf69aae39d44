//! Local filesystem snapshot provider.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::provider::{ContentSource, SnapshotProvider};
use notesync_common::{normalize_path, Error, LocalFileRecord, Result};

/// Snapshot of a notes directory on the local filesystem.
///
/// Symlinks are never followed.
pub struct LocalSnapshot {
    root: PathBuf,
    skip_hidden: bool,
}

impl LocalSnapshot {
    /// Create a snapshot provider rooted at `root`.
    ///
    /// # Errors
    /// - `NotFound` if root does not exist
    /// - `InvalidInput` if root is not a directory
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            return Err(Error::NotFound(format!(
                "Notes directory not found: {}",
                root.display()
            )));
        }
        if !root.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Notes root is not a directory: {}",
                root.display()
            )));
        }

        Ok(Self {
            root,
            skip_hidden: true,
        })
    }

    /// Include or skip entries whose name starts with `.`.
    pub fn with_skip_hidden(mut self, skip_hidden: bool) -> Self {
        self.skip_hidden = skip_hidden;
        self
    }

    /// Notes directory being read.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert a relative snapshot path to a filesystem path.
    fn to_fs_path(&self, path: &str) -> Result<PathBuf> {
        let normalized = normalize_path(path);
        let relative = Path::new(&normalized);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::InvalidInput(format!(
                "Path escapes the notes directory: {}",
                path
            )));
        }
        Ok(self.root.join(relative))
    }

    fn is_hidden(name: &str) -> bool {
        name.starts_with('.')
    }
}

#[async_trait]
impl SnapshotProvider for LocalSnapshot {
    async fn snapshot(&self) -> Result<Vec<LocalFileRecord>> {
        let mut records = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];

        while let Some((dir, prefix)) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;

            while let Some(entry) = entries.next_entry().await? {
                let name = match entry.file_name().into_string() {
                    Ok(name) => name,
                    Err(name) => {
                        debug!("Skipping non UTF-8 path {:?}", name);
                        continue;
                    }
                };
                if self.skip_hidden && Self::is_hidden(&name) {
                    continue;
                }

                let relative = if prefix.is_empty() {
                    name
                } else {
                    format!("{}/{}", prefix, name)
                };

                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push((entry.path(), relative));
                } else if file_type.is_file() {
                    let content = fs::read(entry.path()).await?;
                    records.push(LocalFileRecord::new(&relative, content));
                } else {
                    debug!("Skipping special file {}", relative);
                }
            }
        }

        records.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(
            "Snapshot of {} found {} files",
            self.root.display(),
            records.len()
        );
        Ok(records)
    }
}

#[async_trait]
impl ContentSource for LocalSnapshot {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let fs_path = self.to_fs_path(path)?;

        if !fs_path.is_file() {
            return Err(Error::NotFound(format!("File not found: {}", path)));
        }

        Ok(fs::read(&fs_path).await?)
    }
}
