//! In-memory local source and remote repository for testing.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tokio::sync::Mutex;

use crate::provider::{
    CommitProvider, ContentProvider, ContentSource, Release, ReleaseProvider, SnapshotProvider,
    TreeChange, TreeListing, TreeProvider,
};
use notesync_common::{
    normalize_path, ContentAddresser, Error, LocalFileRecord, ObjectKind, RefHead,
    RemoteTreeEntry, RepoId, Result,
};

/// In-memory local file set.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemorySource {
    /// Create a new empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file.
    pub fn insert(&mut self, path: &str, content: impl Into<Vec<u8>>) {
        self.files.insert(normalize_path(path), content.into());
    }

    /// Remove a file.
    pub fn remove(&mut self, path: &str) -> Option<Vec<u8>> {
        self.files.remove(&normalize_path(path))
    }

    /// Build a source from `(path, content)` pairs.
    pub fn from_files<P: AsRef<str>, C: AsRef<[u8]>>(files: &[(P, C)]) -> Self {
        let mut source = Self::new();
        for (path, content) in files {
            source.insert(path.as_ref(), content.as_ref().to_vec());
        }
        source
    }

    /// The records a snapshot would return.
    pub fn records(&self) -> Vec<LocalFileRecord> {
        self.files
            .iter()
            .map(|(path, content)| LocalFileRecord::new(path, content.clone()))
            .collect()
    }
}

#[async_trait]
impl SnapshotProvider for MemorySource {
    async fn snapshot(&self) -> Result<Vec<LocalFileRecord>> {
        Ok(self.records())
    }
}

#[async_trait]
impl ContentSource for MemorySource {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .get(&normalize_path(path))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", path)))
    }
}

/// Remote operations, used for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Head,
    GetTree,
    GetContent,
    CreateBlob,
    CreateTree,
    CreateCommit,
    UpdateRef,
}

#[derive(Debug, Clone)]
struct CommitObject {
    tree: String,
    parents: Vec<String>,
    message: String,
}

#[derive(Default)]
struct State {
    blobs: HashMap<String, Vec<u8>>,
    /// Tree id to flattened `path -> blob id` map.
    trees: HashMap<String, BTreeMap<String, String>>,
    commits: HashMap<String, CommitObject>,
    branches: HashMap<String, String>,
    release: Option<Release>,
    sequence: u64,
    failures: HashSet<Operation>,
    calls: HashMap<Operation, usize>,
}

impl State {
    fn record(&mut self, op: Operation) -> Result<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        if self.failures.remove(&op) {
            return Err(Error::Network(format!("Injected failure in {:?}", op)));
        }
        Ok(())
    }

    fn store_blob(&mut self, content: Vec<u8>) -> String {
        let id = ContentAddresser::hash(&content);
        self.blobs.insert(id.clone(), content);
        id
    }

    fn store_tree(&mut self, files: BTreeMap<String, String>) -> String {
        let id = tree_id(&files);
        self.trees.insert(id.clone(), files);
        id
    }

    fn store_commit(&mut self, tree: &str, parents: Vec<String>, message: &str) -> String {
        self.sequence += 1;
        let mut body = format!("tree {}\n", tree);
        for parent in &parents {
            body.push_str(&format!("parent {}\n", parent));
        }
        body.push_str(&format!("sequence {}\n\n{}", self.sequence, message));

        let id = ContentAddresser::hash_object(ObjectKind::Commit, body.as_bytes());
        self.commits.insert(
            id.clone(),
            CommitObject {
                tree: tree.to_string(),
                parents,
                message: message.to_string(),
            },
        );
        id
    }

    fn resolve(&self, reference: &str) -> Option<&CommitObject> {
        let commit = self
            .branches
            .get(reference)
            .map(String::as_str)
            .unwrap_or(reference);
        self.commits.get(commit)
    }
}

/// Content-derived id for a flattened tree.
///
/// Stable and collision-resistant, but not byte-compatible with Git trees.
fn tree_id(files: &BTreeMap<String, String>) -> String {
    let mut canonical = Vec::new();
    for (path, blob) in files {
        canonical.extend_from_slice(path.as_bytes());
        canonical.push(0);
        canonical.extend_from_slice(blob.as_bytes());
        canonical.push(b'\n');
    }
    ContentAddresser::hash_object(ObjectKind::Tree, &canonical)
}

fn parent_dirs(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/').map(move |(idx, _)| &path[..idx])
}

/// In-memory Git-like remote holding a single repository.
///
/// Blob ids are real Git blob ids. Objects are only reachable once a
/// branch is moved onto a commit that contains them.
pub struct MemoryRemote {
    repo: RepoId,
    state: Mutex<State>,
}

impl MemoryRemote {
    /// Create a remote whose `branch` points at a commit with `files`.
    pub fn with_files<P: AsRef<str>, C: AsRef<[u8]>>(
        repo: RepoId,
        branch: &str,
        files: &[(P, C)],
    ) -> Self {
        let mut state = State::default();
        let mut flat = BTreeMap::new();
        for (path, content) in files {
            let blob = state.store_blob(content.as_ref().to_vec());
            flat.insert(normalize_path(path.as_ref()), blob);
        }
        let tree = state.store_tree(flat);
        let commit = state.store_commit(&tree, Vec::new(), "Initial commit");
        state.branches.insert(branch.to_string(), commit);

        Self {
            repo,
            state: Mutex::new(state),
        }
    }

    /// Create a remote with an empty initial commit on `branch`.
    pub fn new(repo: RepoId, branch: &str) -> Self {
        Self::with_files::<&str, &[u8]>(repo, branch, &[])
    }

    /// Commit directly onto `branch`, as another client would.
    pub async fn push_files<P: AsRef<str>, C: AsRef<[u8]>>(
        &self,
        branch: &str,
        files: &[(P, C)],
        removals: &[&str],
    ) -> Result<String> {
        let mut state = self.state.lock().await;
        let head = state
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Branch not found: {}", branch)))?;
        let base_tree = state.commits[&head].tree.clone();

        let mut flat = state.trees[&base_tree].clone();
        for (path, content) in files {
            let blob = state.store_blob(content.as_ref().to_vec());
            flat.insert(normalize_path(path.as_ref()), blob);
        }
        for path in removals {
            flat.remove(&normalize_path(path));
        }

        let tree = state.store_tree(flat);
        let commit = state.store_commit(&tree, vec![head], "External change");
        state.branches.insert(branch.to_string(), commit.clone());
        Ok(commit)
    }

    /// Make the next call of `op` fail with a network error.
    pub async fn fail_next(&self, op: Operation) {
        self.state.lock().await.failures.insert(op);
    }

    /// Number of times `op` has been called.
    pub async fn calls(&self, op: Operation) -> usize {
        self.state.lock().await.calls.get(&op).copied().unwrap_or(0)
    }

    /// Files visible on `branch` as `path -> content`.
    pub async fn files(&self, branch: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        let state = self.state.lock().await;
        let commit = state
            .resolve(branch)
            .ok_or_else(|| Error::NotFound(format!("Branch not found: {}", branch)))?;
        Ok(state.trees[&commit.tree]
            .iter()
            .map(|(path, blob)| (path.clone(), state.blobs[blob].clone()))
            .collect())
    }

    /// Message of the commit `branch` points at.
    pub async fn head_message(&self, branch: &str) -> Option<String> {
        let state = self.state.lock().await;
        state.resolve(branch).map(|commit| commit.message.clone())
    }

    /// Set the release reported by `latest_release`.
    pub async fn set_release(&self, release: Option<Release>) {
        self.state.lock().await.release = release;
    }

    fn check_repo(&self, repo: &RepoId) -> Result<()> {
        if repo != &self.repo {
            return Err(Error::NotFound(format!("Repository not found: {}", repo)));
        }
        Ok(())
    }
}

#[async_trait]
impl TreeProvider for MemoryRemote {
    fn name(&self) -> &str {
        "memory"
    }

    async fn head(&self, repo: &RepoId, branch: &str) -> Result<RefHead> {
        self.check_repo(repo)?;
        let mut state = self.state.lock().await;
        state.record(Operation::Head)?;

        let commit = state
            .branches
            .get(branch)
            .ok_or_else(|| Error::NotFound(format!("Branch not found: {}", branch)))?;
        Ok(RefHead {
            commit: commit.clone(),
            tree: state.commits[commit].tree.clone(),
        })
    }

    async fn get_tree(&self, repo: &RepoId, tree: &str) -> Result<TreeListing> {
        self.check_repo(repo)?;
        let mut state = self.state.lock().await;
        state.record(Operation::GetTree)?;

        let files = state
            .trees
            .get(tree)
            .ok_or_else(|| Error::NotFound(format!("Tree not found: {}", tree)))?;

        let dirs: BTreeSet<&str> = files.keys().flat_map(|p| parent_dirs(p)).collect();
        let mut entries = Vec::with_capacity(files.len() + dirs.len());
        for dir in dirs {
            let prefix = format!("{}/", dir);
            let subtree: BTreeMap<String, String> = files
                .iter()
                .filter_map(|(path, blob)| {
                    path.strip_prefix(&prefix)
                        .map(|rest| (rest.to_string(), blob.clone()))
                })
                .collect();
            entries.push(RemoteTreeEntry::directory(dir, tree_id(&subtree)));
        }
        for (path, blob) in files {
            let size = state.blobs.get(blob).map(|b| b.len() as u64).unwrap_or(0);
            entries.push(RemoteTreeEntry::file(path, blob.clone(), size));
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(TreeListing {
            entries,
            truncated: false,
        })
    }
}

#[async_trait]
impl ContentProvider for MemoryRemote {
    async fn get_file_content(
        &self,
        repo: &RepoId,
        path: &str,
        reference: &str,
    ) -> Result<Option<Vec<u8>>> {
        self.check_repo(repo)?;
        let mut state = self.state.lock().await;
        state.record(Operation::GetContent)?;

        let commit = state
            .resolve(reference)
            .ok_or_else(|| Error::NotFound(format!("Reference not found: {}", reference)))?;
        Ok(state.trees[&commit.tree]
            .get(&normalize_path(path))
            .and_then(|blob| state.blobs.get(blob))
            .cloned())
    }
}

#[async_trait]
impl CommitProvider for MemoryRemote {
    async fn create_blob(&self, repo: &RepoId, content: Vec<u8>) -> Result<String> {
        self.check_repo(repo)?;
        let mut state = self.state.lock().await;
        state.record(Operation::CreateBlob)?;
        Ok(state.store_blob(content))
    }

    async fn create_tree(
        &self,
        repo: &RepoId,
        base_tree: &str,
        changes: Vec<TreeChange>,
    ) -> Result<String> {
        self.check_repo(repo)?;
        let mut state = self.state.lock().await;
        state.record(Operation::CreateTree)?;

        let mut flat = state
            .trees
            .get(base_tree)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Tree not found: {}", base_tree)))?;

        for change in changes {
            let path = normalize_path(&change.path);
            match change.blob {
                Some(blob) => {
                    if !state.blobs.contains_key(&blob) {
                        return Err(Error::NotFound(format!("Blob not found: {}", blob)));
                    }
                    if let Some(parent) = parent_dirs(&path).find(|p| flat.contains_key(*p)) {
                        return Err(Error::TypeConflict {
                            path: path.clone(),
                            detail: format!("{} is a file", parent),
                        });
                    }
                    let prefix = format!("{}/", path);
                    if flat.keys().any(|existing| existing.starts_with(&prefix)) {
                        return Err(Error::TypeConflict {
                            path: path.clone(),
                            detail: "path is a directory".to_string(),
                        });
                    }
                    flat.insert(path, blob);
                }
                None => {
                    if flat.remove(&path).is_none() {
                        return Err(Error::NotFound(format!("Path not in tree: {}", path)));
                    }
                }
            }
        }

        Ok(state.store_tree(flat))
    }

    async fn create_commit(
        &self,
        repo: &RepoId,
        message: &str,
        tree: &str,
        parents: Vec<String>,
    ) -> Result<String> {
        self.check_repo(repo)?;
        let mut state = self.state.lock().await;
        state.record(Operation::CreateCommit)?;

        if !state.trees.contains_key(tree) {
            return Err(Error::NotFound(format!("Tree not found: {}", tree)));
        }
        if let Some(missing) = parents.iter().find(|p| !state.commits.contains_key(*p)) {
            return Err(Error::NotFound(format!("Parent commit not found: {}", missing)));
        }
        Ok(state.store_commit(tree, parents, message))
    }

    async fn update_ref(
        &self,
        repo: &RepoId,
        branch: &str,
        commit: &str,
        expected: &str,
    ) -> Result<()> {
        self.check_repo(repo)?;
        let mut state = self.state.lock().await;
        state.record(Operation::UpdateRef)?;

        let current = state
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Branch not found: {}", branch)))?;
        if current != expected {
            return Err(Error::ConcurrentModification {
                reference: format!("heads/{}", branch),
                expected: expected.to_string(),
                actual: current,
            });
        }

        let object = state
            .commits
            .get(commit)
            .ok_or_else(|| Error::NotFound(format!("Commit not found: {}", commit)))?;
        if !object.parents.iter().any(|p| p == expected) {
            return Err(Error::InvalidInput(format!(
                "Update of heads/{} is not a fast forward",
                branch
            )));
        }

        state.branches.insert(branch.to_string(), commit.to_string());
        Ok(())
    }
}

#[async_trait]
impl ReleaseProvider for MemoryRemote {
    async fn latest_release(&self, repo: &RepoId) -> Result<Option<Release>> {
        self.check_repo(repo)?;
        Ok(self.state.lock().await.release.clone())
    }
}
