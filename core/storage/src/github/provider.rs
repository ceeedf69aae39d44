//! GitHub remote repository provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use notesync_common::{Error, RefHead, RemoteTreeEntry, RepoId, Result};

use crate::provider::{
    CommitProvider, ContentProvider, Release, ReleaseProvider, TreeChange, TreeListing,
    TreeProvider,
};

use super::client::{GitHubClient, NewTreeItem, GITHUB_API_BASE};

/// Regular, non-executable file mode.
const FILE_MODE: &str = "100644";

/// GitHub provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// API base URL (GitHub Enterprise uses `https://host/api/v3`).
    pub api_base: String,
    /// Personal access token with contents write permission.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: GITHUB_API_BASE.to_string(),
            token: None,
        }
    }
}

/// GitHub provider.
///
/// Implements the remote collaborator traits over the Git Data API.
pub struct GitHubProvider {
    client: GitHubClient,
}

impl GitHubProvider {
    /// Create a new GitHub provider.
    ///
    /// # Errors
    /// - HTTP client construction failure
    pub fn new(config: GitHubConfig) -> Result<Self> {
        if config.token.is_none() {
            warn!("No GitHub token configured, write operations will fail");
        }
        let client = GitHubClient::new(config.api_base, config.token)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TreeProvider for GitHubProvider {
    fn name(&self) -> &str {
        "github"
    }

    async fn head(&self, repo: &RepoId, branch: &str) -> Result<RefHead> {
        let reference = self.client.get_branch_ref(repo, branch).await?;
        let commit = self.client.get_commit(repo, &reference.object.sha).await?;
        debug!("{} is at {}", reference.name, commit.sha);

        Ok(RefHead {
            commit: commit.sha,
            tree: commit.tree.sha,
        })
    }

    async fn get_tree(&self, repo: &RepoId, tree: &str) -> Result<TreeListing> {
        let listing = self.client.get_tree(repo, tree).await?;
        if listing.truncated {
            warn!("Tree listing for {} was truncated by the remote", repo);
        }

        let entries = listing
            .tree
            .into_iter()
            .filter_map(|item| {
                if item.is_blob() {
                    Some(RemoteTreeEntry::file(&item.path, item.sha, item.size.unwrap_or(0)))
                } else if item.is_tree() {
                    Some(RemoteTreeEntry::directory(&item.path, item.sha))
                } else {
                    // Submodule commits have no content to compare.
                    debug!("Ignoring {} entry {}", item.kind, item.path);
                    None
                }
            })
            .collect();

        Ok(TreeListing {
            entries,
            truncated: listing.truncated,
        })
    }
}

#[async_trait]
impl ContentProvider for GitHubProvider {
    async fn get_file_content(
        &self,
        repo: &RepoId,
        path: &str,
        reference: &str,
    ) -> Result<Option<Vec<u8>>> {
        self.client.get_contents(repo, path, reference).await
    }
}

#[async_trait]
impl CommitProvider for GitHubProvider {
    async fn create_blob(&self, repo: &RepoId, content: Vec<u8>) -> Result<String> {
        self.client.create_blob(repo, &content).await
    }

    async fn create_tree(
        &self,
        repo: &RepoId,
        base_tree: &str,
        changes: Vec<TreeChange>,
    ) -> Result<String> {
        let items: Vec<NewTreeItem> = changes
            .into_iter()
            .map(|change| NewTreeItem {
                path: change.path,
                mode: FILE_MODE,
                kind: "blob",
                sha: change.blob,
            })
            .collect();

        self.client.create_tree(repo, base_tree, &items).await
    }

    async fn create_commit(
        &self,
        repo: &RepoId,
        message: &str,
        tree: &str,
        parents: Vec<String>,
    ) -> Result<String> {
        let commit = self.client.create_commit(repo, message, tree, &parents).await?;
        Ok(commit.sha)
    }

    async fn update_ref(
        &self,
        repo: &RepoId,
        branch: &str,
        commit: &str,
        expected: &str,
    ) -> Result<()> {
        // The REST API has no compare-and-swap. The ref is checked against
        // `expected` right before the non-forced PATCH, which still refuses
        // anything that does not fast-forward.
        let current = self.client.get_branch_ref(repo, branch).await?;
        if current.object.sha != expected {
            return Err(Error::ConcurrentModification {
                reference: format!("heads/{}", branch),
                expected: expected.to_string(),
                actual: current.object.sha,
            });
        }

        debug!("Moving heads/{} from {} to {}", branch, expected, commit);
        self.client.update_branch_ref(repo, branch, commit).await
    }
}

#[async_trait]
impl ReleaseProvider for GitHubProvider {
    async fn latest_release(&self, repo: &RepoId) -> Result<Option<Release>> {
        let release = self.client.latest_release(repo).await?;
        Ok(release.map(|r| Release {
            tag: r.tag_name,
            name: r.name,
            published_at: r.published_at,
            body: r.body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_points_at_github() {
        let config = GitHubConfig::default();
        assert_eq!(config.api_base, "https://api.github.com");
        assert!(config.token.is_none());
    }

    #[test]
    fn test_token_is_never_serialized() {
        let config = GitHubConfig {
            api_base: GITHUB_API_BASE.to_string(),
            token: Some("ghp_secret".to_string()),
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("ghp_secret"));
    }

    #[test]
    fn test_provider_name() {
        let provider = GitHubProvider::new(GitHubConfig::default()).unwrap();
        assert_eq!(provider.name(), "github");
    }
}
