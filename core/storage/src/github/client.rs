//! GitHub REST API client (Git Data endpoints).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use notesync_common::{Error, RepoId, Result};

/// Public GitHub API base URL.
pub const GITHUB_API_BASE: &str = "https://api.github.com";

/// Characters escaped inside a contents path; `/` is kept as separator.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Object reference returned by the refs and commits endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitObject {
    pub sha: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// Response of `GET /git/ref/heads/{branch}`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitRef {
    #[serde(rename = "ref")]
    pub name: String,
    pub object: GitObject,
}

/// Response of `GET /git/commits/{sha}` and `POST /git/commits`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitCommit {
    pub sha: String,
    pub tree: GitObject,
    #[serde(default)]
    pub parents: Vec<GitObject>,
}

/// One entry of a recursive tree listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitTreeItem {
    pub path: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sha: String,
    #[serde(default)]
    pub size: Option<u64>,
}

impl GitTreeItem {
    pub fn is_blob(&self) -> bool {
        self.kind == "blob"
    }

    pub fn is_tree(&self) -> bool {
        self.kind == "tree"
    }
}

/// Response of `GET /git/trees/{sha}?recursive=1`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitTree {
    pub sha: String,
    pub tree: Vec<GitTreeItem>,
    #[serde(default)]
    pub truncated: bool,
}

/// One entry of a `POST /git/trees` request. `sha: null` deletes the path.
#[derive(Debug, Clone, Serialize)]
pub struct NewTreeItem {
    pub path: String,
    pub mode: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Sha {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

/// Response of `GET /releases/latest`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub body: Option<String>,
}

/// GitHub API client.
pub struct GitHubClient {
    http: Client,
    api_base: String,
    token: Option<String>,
}

impl GitHubClient {
    /// Create a new client.
    ///
    /// # Errors
    /// - HTTP client construction failure
    pub fn new(api_base: impl Into<String>, token: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("notesync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn repo_url(&self, repo: &RepoId, rest: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base,
            repo.owner(),
            repo.name(),
            rest
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        match &self.token {
            Some(token) => builder.header(header::AUTHORIZATION, format!("Bearer {}", token)),
            None => builder,
        }
    }

    /// Resolve a branch to its commit.
    pub async fn get_branch_ref(&self, repo: &RepoId, branch: &str) -> Result<GitRef> {
        let url = self.repo_url(repo, &format!("git/ref/heads/{}", branch));
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to get ref: {}", e)))?;

        self.handle_response(response).await
    }

    /// Get a commit object.
    pub async fn get_commit(&self, repo: &RepoId, sha: &str) -> Result<GitCommit> {
        let url = self.repo_url(repo, &format!("git/commits/{}", sha));
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to get commit: {}", e)))?;

        self.handle_response(response).await
    }

    /// List a tree recursively.
    pub async fn get_tree(&self, repo: &RepoId, sha: &str) -> Result<GitTree> {
        let url = self.repo_url(repo, &format!("git/trees/{}", sha));
        let response = self
            .request(reqwest::Method::GET, &url)
            .query(&[("recursive", "1")])
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to get tree: {}", e)))?;

        self.handle_response(response).await
    }

    /// Download one file through the contents endpoint.
    ///
    /// Returns `None` for missing paths and for paths that are not files.
    pub async fn get_contents(
        &self,
        repo: &RepoId,
        path: &str,
        reference: &str,
    ) -> Result<Option<Vec<u8>>> {
        let encoded = utf8_percent_encode(path, PATH_SEGMENT).to_string();
        let url = self.repo_url(repo, &format!("contents/{}", encoded));
        let response = self
            .request(reqwest::Method::GET, &url)
            .query(&[("ref", reference)])
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to get contents: {}", e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        // Directory listings come back as JSON arrays.
        let value: serde_json::Value = self.handle_response(response).await?;
        if value.is_array() {
            return Ok(None);
        }
        let contents: ContentsResponse = serde_json::from_value(value)
            .map_err(|e| Error::Serialization(format!("Unexpected contents response: {}", e)))?;
        if contents.kind != "file" {
            return Ok(None);
        }

        match (contents.encoding.as_deref(), contents.content) {
            (Some("base64"), Some(content)) => {
                let compact: String = content.split_whitespace().collect();
                STANDARD
                    .decode(compact)
                    .map(Some)
                    .map_err(|e| Error::Serialization(format!("Invalid base64 content: {}", e)))
            }
            (encoding, _) => Err(Error::Serialization(format!(
                "Unsupported content encoding for {}: {:?}",
                path, encoding
            ))),
        }
    }

    /// Upload a blob.
    pub async fn create_blob(&self, repo: &RepoId, content: &[u8]) -> Result<String> {
        let url = self.repo_url(repo, "git/blobs");
        let body = serde_json::json!({
            "content": STANDARD.encode(content),
            "encoding": "base64",
        });

        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to create blob: {}", e)))?;

        let created: Sha = self.handle_response(response).await?;
        Ok(created.sha)
    }

    /// Create a tree on top of `base_tree`.
    pub async fn create_tree(
        &self,
        repo: &RepoId,
        base_tree: &str,
        items: &[NewTreeItem],
    ) -> Result<String> {
        let url = self.repo_url(repo, "git/trees");
        let body = serde_json::json!({
            "base_tree": base_tree,
            "tree": items,
        });

        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to create tree: {}", e)))?;

        let created: Sha = self.handle_response(response).await?;
        Ok(created.sha)
    }

    /// Create a commit.
    pub async fn create_commit(
        &self,
        repo: &RepoId,
        message: &str,
        tree: &str,
        parents: &[String],
    ) -> Result<GitCommit> {
        let url = self.repo_url(repo, "git/commits");
        let body = serde_json::json!({
            "message": message,
            "tree": tree,
            "parents": parents,
        });

        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to create commit: {}", e)))?;

        self.handle_response(response).await
    }

    /// Move a branch without forcing.
    ///
    /// GitHub answers 422 "Update is not a fast forward" when the branch
    /// has moved; any other 422 is a rejected request.
    pub async fn update_branch_ref(&self, repo: &RepoId, branch: &str, sha: &str) -> Result<()> {
        let url = self.repo_url(repo, &format!("git/refs/heads/{}", branch));
        let body = serde_json::json!({ "sha": sha, "force": false });

        let response = self
            .request(reqwest::Method::PATCH, &url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to update ref: {}", e)))?;

        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            debug!("Ref update rejected: {}", body);
            return Err(rejected_ref_update(branch, &body));
        }

        let _: GitRef = self.handle_response(response).await?;
        Ok(())
    }

    /// Fetch the latest published release.
    pub async fn latest_release(&self, repo: &RepoId) -> Result<Option<GitHubRelease>> {
        let url = self.repo_url(repo, "releases/latest");
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to get release: {}", e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        self.handle_response(response).await.map(Some)
    }

    /// Handle API response with error checking.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| Error::Network(format!("Failed to parse response: {}", e)));
        }

        let path = response.url().path().to_string();
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &path, &body))
    }
}

/// Whether a 422 body says the ref update would not fast-forward.
pub fn is_not_fast_forward(body: &str) -> bool {
    let body = body.to_ascii_lowercase();
    body.contains("not a fast forward") || body.contains("not a fast-forward")
}

fn rejected_ref_update(branch: &str, body: &str) -> Error {
    if is_not_fast_forward(body) {
        Error::ConcurrentModification {
            reference: format!("heads/{}", branch),
            expected: "fast-forward".to_string(),
            actual: body.to_string(),
        }
    } else {
        Error::ReferenceUpdateFailure(format!("heads/{} rejected: {}", branch, body))
    }
}

/// Map a failed response to an error.
fn status_error(status: StatusCode, path: &str, body: &str) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::NotFound(format!("Resource not found: {}", path)),
        StatusCode::UNAUTHORIZED => Error::Authentication("Invalid or missing token".to_string()),
        StatusCode::FORBIDDEN => Error::PermissionDenied(format!("Access denied: {}", body)),
        // GitHub answers 409 on the Git Data endpoints of a repository without commits.
        StatusCode::CONFLICT => Error::NotFound(format!("Repository is empty: {}", path)),
        _ => Error::Network(format!("API error: {} - {}", status, body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_item_kinds() {
        let json = r#"{
            "sha": "root",
            "truncated": false,
            "tree": [
                {"path": "content", "mode": "040000", "type": "tree", "sha": "t1"},
                {"path": "content/a.md", "mode": "100644", "type": "blob", "sha": "b1", "size": 12}
            ]
        }"#;

        let tree: GitTree = serde_json::from_str(json).unwrap();
        assert!(tree.tree[0].is_tree());
        assert!(tree.tree[1].is_blob());
        assert_eq!(tree.tree[1].size, Some(12));
        assert!(!tree.truncated);
    }

    #[test]
    fn test_new_tree_item_serializes_null_sha() {
        let item = NewTreeItem {
            path: "content/old.md".to_string(),
            mode: "100644",
            kind: "blob",
            sha: None,
        };

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "blob");
        assert!(json["sha"].is_null());
    }

    #[test]
    fn test_release_deserialization() {
        let json = r#"{"tag_name": "v0.3.1", "name": "0.3.1", "published_at": "2024-05-01T10:00:00Z", "body": "notes"}"#;
        let release: GitHubRelease = serde_json::from_str(json).unwrap();
        assert_eq!(release.tag_name, "v0.3.1");
        assert!(release.published_at.is_some());
    }

    #[test]
    fn test_repo_url_trims_base() {
        let client = GitHubClient::new("https://ghe.example.com/api/v3/", None).unwrap();
        let repo = RepoId::new("alice", "garden").unwrap();
        assert_eq!(
            client.repo_url(&repo, "git/trees/abc"),
            "https://ghe.example.com/api/v3/repos/alice/garden/git/trees/abc"
        );
    }

    #[test]
    fn test_non_fast_forward_is_concurrent_modification() {
        let body = r#"{"message":"Update is not a fast forward","documentation_url":"https://docs.github.com/rest"}"#;
        assert!(is_not_fast_forward(body));
        assert!(matches!(
            rejected_ref_update("main", body),
            Error::ConcurrentModification { .. }
        ));
    }

    #[test]
    fn test_other_422_is_reference_failure() {
        let body = r#"{"message":"Object does not exist","documentation_url":"https://docs.github.com/rest"}"#;
        assert!(!is_not_fast_forward(body));
        let err = rejected_ref_update("main", body);
        assert!(matches!(err, Error::ReferenceUpdateFailure(_)));
        assert!(err.to_string().contains("Object does not exist"));
    }

    #[test]
    fn test_status_mapping() {
        let path = "/repos/alice/garden/git/refs/heads/main";
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, path, ""),
            Error::NotFound(_)
        ));
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, path, ""),
            Error::Authentication(_)
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, path, "rate limited"),
            Error::PermissionDenied(_)
        ));
        match status_error(StatusCode::CONFLICT, path, "Git Repository is empty.") {
            Error::NotFound(message) => assert!(message.contains("empty")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(status_error(StatusCode::BAD_GATEWAY, path, "").is_retryable());
    }

    #[test]
    fn test_path_encoding_keeps_separators() {
        let encoded = utf8_percent_encode("notes/my note#1.md", PATH_SEGMENT).to_string();
        assert_eq!(encoded, "notes/my%20note%231.md");
    }
}
