//! Sync configuration loaded from a TOML file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use notesync_common::{normalize_path, Error, RepoId, Result};
use notesync_storage::GitHubConfig;

use crate::plan::PlanCounts;
use crate::policy::PathPolicy;
use crate::size::DEFAULT_MAX_FILE_SIZE;

/// Environment variable that overrides the configured token.
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

fn default_branch() -> String {
    "main".to_string()
}

fn default_content_root() -> String {
    "content".to_string()
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn default_commit_message() -> String {
    "Sync notes: {new} new, {modified} modified, {deleted} deleted".to_string()
}

fn default_skip_hidden() -> bool {
    true
}

fn default_api_base() -> String {
    notesync_storage::github::GITHUB_API_BASE.to_string()
}

fn default_max_retries() -> u32 {
    3
}

/// Everything needed to sync one notes directory to one branch.
#[derive(Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Folder inside the repository that mirrors `notes_dir`. Empty for the root.
    #[serde(default = "default_content_root")]
    pub content_root: String,
    /// Local notes directory. Relative paths resolve against the config file.
    pub notes_dir: PathBuf,
    #[serde(default)]
    pub exclude: Vec<String>,
    /// When non-empty, only matching paths are synced.
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Template; `{new}`, `{modified}` and `{deleted}` are replaced by counts.
    #[serde(default = "default_commit_message")]
    pub commit_message: String,
    #[serde(default = "default_skip_hidden")]
    pub skip_hidden: bool,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    /// Retries for remote reads. Commits are never retried automatically.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("content_root", &self.content_root)
            .field("notes_dir", &self.notes_dir)
            .field("exclude", &self.exclude)
            .field("include", &self.include)
            .field("max_file_size", &self.max_file_size)
            .field("skip_hidden", &self.skip_hidden)
            .field("api_base", &self.api_base)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl SyncConfig {
    /// Minimal configuration with defaults for everything optional.
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, notes_dir: impl Into<PathBuf>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: default_branch(),
            content_root: default_content_root(),
            notes_dir: notes_dir.into(),
            exclude: Vec::new(),
            include: Vec::new(),
            max_file_size: default_max_file_size(),
            commit_message: default_commit_message(),
            skip_hidden: default_skip_hidden(),
            api_base: default_api_base(),
            token: None,
            max_retries: default_max_retries(),
        }
    }

    /// Parse a configuration. Does not validate.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Serialize to TOML. The token is never written.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Read a configuration file without validating it.
    pub async fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;

        let mut config = Self::from_toml_str(&content)?;
        if config.notes_dir.is_relative() {
            if let Some(parent) = path.parent() {
                config.notes_dir = parent.join(&config.notes_dir);
            }
        }
        Ok(config)
    }

    /// Read and validate a configuration file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = Self::read(path).await?;
        config.validate()?;

        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Check every field. Patterns are validated before anything else.
    ///
    /// # Errors
    /// - `Error::Policy` for the first invalid pattern
    /// - `Error::Config` for any other invalid field
    pub fn validate(&self) -> Result<()> {
        self.policy()?;
        self.repo_id()
            .map_err(|e| Error::Config(format!("Invalid repository: {}", e)))?;

        if self.branch.trim().is_empty()
            || self.branch.contains(char::is_whitespace)
            || self.branch.contains("..")
        {
            return Err(Error::Config(format!("Invalid branch name: {:?}", self.branch)));
        }
        if normalize_path(&self.content_root)
            .split('/')
            .any(|segment| segment == "..")
        {
            return Err(Error::Config(format!(
                "Content root must stay inside the repository: {}",
                self.content_root
            )));
        }
        if self.max_file_size == 0 {
            return Err(Error::Config("max_file_size must be positive".to_string()));
        }
        url::Url::parse(&self.api_base)
            .map_err(|e| Error::Config(format!("Invalid api_base {}: {}", self.api_base, e)))?;

        Ok(())
    }

    /// Validated `owner/repo`.
    pub fn repo_id(&self) -> Result<RepoId> {
        RepoId::new(&self.owner, &self.repo)
    }

    /// Compiled exclude/include policy.
    pub fn policy(&self) -> Result<PathPolicy> {
        PathPolicy::new(&self.exclude[..], &self.include[..])
    }

    /// Normalized remote content root.
    pub fn remote_root(&self) -> String {
        normalize_path(&self.content_root)
    }

    /// Token from the environment, falling back to the file.
    pub fn token(&self) -> Option<String> {
        self.resolve_token(std::env::var(TOKEN_ENV).ok())
    }

    fn resolve_token(&self, from_env: Option<String>) -> Option<String> {
        from_env
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.token.clone())
    }

    /// Client settings for the GitHub backend.
    pub fn github(&self) -> GitHubConfig {
        GitHubConfig {
            api_base: self.api_base.clone(),
            token: self.token(),
        }
    }

    /// Fill the commit message template.
    pub fn render_commit_message(&self, counts: &PlanCounts) -> String {
        self.commit_message
            .replace("{new}", &counts.new.to_string())
            .replace("{modified}", &counts.modified.to_string())
            .replace("{deleted}", &counts.deleted.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notesync_common::PatternViolation;

    const MINIMAL: &str = r#"
owner = "alice"
repo = "garden"
notes_dir = "notes"
"#;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::from_toml_str(MINIMAL).unwrap();

        assert_eq!(config.branch, "main");
        assert_eq!(config.content_root, "content");
        assert_eq!(config.max_file_size, DEFAULT_MAX_FILE_SIZE);
        assert!(config.skip_hidden);
        assert_eq!(config.api_base, "https://api.github.com");
        assert_eq!(config.max_retries, 3);
        assert!(config.exclude.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_full_config() {
        let config = SyncConfig::from_toml_str(
            r#"
owner = "alice"
repo = "garden"
branch = "v4"
content_root = ""
notes_dir = "/home/alice/vault"
exclude = ["private/**", "**.canvas"]
include = ["**.md"]
max_file_size = 1024
commit_message = "notes ({new}/{modified}/{deleted})"
skip_hidden = false
"#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.remote_root(), "");
        let policy = config.policy().unwrap();
        assert!(policy.admits("daily/today.md"));
        assert!(!policy.admits("private/diary.md"));
        assert!(!policy.admits("board.canvas"));
    }

    #[test]
    fn test_invalid_pattern_is_policy_error() {
        let mut config = SyncConfig::new("alice", "garden", "notes");
        config.exclude = vec!["drafts/**".to_string(), "a b".to_string()];

        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            Error::Policy {
                reason: PatternViolation::InvalidCharacter(' '),
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_fields() {
        let mut config = SyncConfig::new("alice", "garden", "notes");
        config.branch = "feature branch".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = SyncConfig::new("alice", "garden", "notes");
        config.content_root = "../outside".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = SyncConfig::new("alice", "garden", "notes");
        config.api_base = "not a url".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = SyncConfig::new("", "garden", "notes");
        config.max_file_size = 1;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_required_field() {
        let err = SyncConfig::from_toml_str("owner = \"alice\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_render_commit_message() {
        let config = SyncConfig::new("alice", "garden", "notes");
        let counts = PlanCounts {
            new: 2,
            modified: 1,
            deleted: 0,
        };
        assert_eq!(
            config.render_commit_message(&counts),
            "Sync notes: 2 new, 1 modified, 0 deleted"
        );
    }

    #[test]
    fn test_token_resolution() {
        let mut config = SyncConfig::new("alice", "garden", "notes");
        config.token = Some("from-file".to_string());

        assert_eq!(
            config.resolve_token(Some("from-env".to_string())).as_deref(),
            Some("from-env")
        );
        assert_eq!(
            config.resolve_token(Some("  ".to_string())).as_deref(),
            Some("from-file")
        );
        assert_eq!(config.resolve_token(None).as_deref(), Some("from-file"));
    }

    #[test]
    fn test_token_is_not_serialized_or_logged() {
        let mut config = SyncConfig::new("alice", "garden", "notes");
        config.token = Some("ghp_secret".to_string());

        assert!(!config.to_toml_string().unwrap().contains("ghp_secret"));
        assert!(!format!("{:?}", config).contains("ghp_secret"));
    }

    #[tokio::test]
    async fn test_load_resolves_relative_notes_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notesync.toml");
        tokio::fs::write(&path, MINIMAL).await.unwrap();

        let config = SyncConfig::load(&path).await.unwrap();
        assert_eq!(config.notes_dir, dir.path().join("notes"));
    }
}
