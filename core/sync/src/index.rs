//! Read-only keyed view over a remote tree listing.

use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use notesync_common::{normalize_path, EntryKind, RefHead, RemoteTreeEntry};

/// Remote files by normalized path.
///
/// Directory entries, explicit or implied by file paths, are kept only to
/// answer containment questions for type-conflict detection.
#[derive(Debug, Clone, Default)]
pub struct TreeIndex {
    files: BTreeMap<String, RemoteTreeEntry>,
    directories: BTreeSet<String>,
    head: Option<RefHead>,
    truncated: bool,
    duplicates: usize,
}

impl TreeIndex {
    /// Build an index in a single pass. Duplicate paths: last one wins.
    pub fn build(entries: impl IntoIterator<Item = RemoteTreeEntry>) -> Self {
        let mut index = Self::default();

        for mut entry in entries {
            entry.path = normalize_path(&entry.path);
            if entry.path.is_empty() {
                continue;
            }

            match entry.kind {
                EntryKind::Directory => {
                    index.directories.insert(entry.path);
                }
                EntryKind::File => {
                    for (idx, _) in entry.path.match_indices('/') {
                        index.directories.insert(entry.path[..idx].to_string());
                    }
                    let path = entry.path.clone();
                    if index.files.insert(path.clone(), entry).is_some() {
                        warn!("Remote listing contains {} more than once", path);
                        index.duplicates += 1;
                    }
                }
            }
        }

        for path in index.files.keys() {
            if index.directories.contains(path) {
                warn!("Remote listing has {} as both file and directory", path);
            }
        }

        index
    }

    /// Build an index of the entries below `root`, with `root/` stripped.
    pub fn build_scoped(entries: impl IntoIterator<Item = RemoteTreeEntry>, root: &str) -> Self {
        let root = normalize_path(root);
        if root.is_empty() {
            return Self::build(entries);
        }

        let prefix = format!("{}/", root);
        Self::build(entries.into_iter().filter_map(|mut entry| {
            let path = normalize_path(&entry.path);
            if path == root && entry.kind == EntryKind::File {
                warn!("Remote content root {} is a file", root);
            }
            let relative = path.strip_prefix(&prefix)?.to_string();
            entry.path = relative;
            Some(entry)
        }))
    }

    /// Record the head this listing was taken from.
    pub fn with_head(mut self, head: RefHead) -> Self {
        self.head = Some(head);
        self
    }

    /// Mark the listing as incomplete.
    pub fn with_truncated(mut self, truncated: bool) -> Self {
        self.truncated = truncated;
        self
    }

    /// Look up a file entry by exact normalized path.
    pub fn get(&self, path: &str) -> Option<&RemoteTreeEntry> {
        self.files.get(path)
    }

    /// Whether a remote file exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// All file paths.
    pub fn paths(&self) -> BTreeSet<String> {
        self.files.keys().cloned().collect()
    }

    /// All file entries, ordered by path.
    pub fn files(&self) -> impl Iterator<Item = &RemoteTreeEntry> {
        self.files.values()
    }

    /// Whether `path` is a directory on the remote.
    pub fn is_directory(&self, path: &str) -> bool {
        self.directories.contains(path)
    }

    /// The nearest proper ancestor of `path` that is a remote file.
    pub fn file_ancestor<'a>(&self, path: &'a str) -> Option<&'a str> {
        path.match_indices('/')
            .map(|(idx, _)| &path[..idx])
            .find(|ancestor| self.files.contains_key(*ancestor))
    }

    /// Whether `path` lies strictly inside directory `dir`.
    pub fn is_below(path: &str, dir: &str) -> bool {
        path.strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Head commit and tree the listing was taken from.
    pub fn head(&self) -> Option<&RefHead> {
        self.head.as_ref()
    }

    /// Whether the remote cut the listing short.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Number of duplicate file paths seen while building.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing() -> Vec<RemoteTreeEntry> {
        vec![
            RemoteTreeEntry::directory("content", "t1"),
            RemoteTreeEntry::file("content/a.md", "h1", 1),
            RemoteTreeEntry::directory("content/daily", "t2"),
            RemoteTreeEntry::file("content/daily/today.md", "h2", 2),
            RemoteTreeEntry::file("quartz.config.ts", "h3", 3),
        ]
    }

    #[test]
    fn test_build_keeps_files_for_lookup() {
        let index = TreeIndex::build(listing());

        assert_eq!(index.len(), 3);
        assert_eq!(index.get("content/a.md").unwrap().content_hash, "h1");
        assert!(index.get("content").is_none());
        assert!(index.is_directory("content/daily"));
        assert!(!index.is_directory("content/a.md"));
    }

    #[test]
    fn test_duplicates_last_wins() {
        let index = TreeIndex::build(vec![
            RemoteTreeEntry::file("a.md", "old", 1),
            RemoteTreeEntry::file("a.md", "new", 1),
        ]);
        assert_eq!(index.get("a.md").unwrap().content_hash, "new");
        assert_eq!(index.duplicates(), 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_is_below() {
        assert!(TreeIndex::is_below("notes/a.md", "notes"));
        assert!(TreeIndex::is_below("notes/x/a.md", "notes"));
        assert!(!TreeIndex::is_below("notes", "notes"));
        assert!(!TreeIndex::is_below("notesextra.md", "notes"));
    }

    #[test]
    fn test_implied_directories() {
        let index = TreeIndex::build(vec![RemoteTreeEntry::file("a/b/c.md", "h", 1)]);
        assert!(index.is_directory("a"));
        assert!(index.is_directory("a/b"));
    }

    #[test]
    fn test_file_ancestor() {
        let index = TreeIndex::build(vec![RemoteTreeEntry::file("notes", "h", 1)]);
        assert_eq!(index.file_ancestor("notes/today.md"), Some("notes"));
        assert_eq!(index.file_ancestor("other/today.md"), None);
        assert_eq!(index.file_ancestor("notes"), None);
    }

    #[test]
    fn test_scoped_build_strips_root() {
        let index = TreeIndex::build_scoped(listing(), "content");

        let paths: Vec<_> = index.paths().into_iter().collect();
        assert_eq!(paths, vec!["a.md", "daily/today.md"]);
        assert!(index.is_directory("daily"));
        assert!(!index.contains("quartz.config.ts"));
    }

    #[test]
    fn test_empty_root_is_whole_tree() {
        let index = TreeIndex::build_scoped(listing(), "");
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_head_and_truncation() {
        let head = RefHead {
            commit: "c1".to_string(),
            tree: "t1".to_string(),
        };
        let index = TreeIndex::build(listing())
            .with_head(head.clone())
            .with_truncated(true);
        assert_eq!(index.head(), Some(&head));
        assert!(index.is_truncated());
    }
}
