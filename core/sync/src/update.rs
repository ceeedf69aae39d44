//! Release check for the notesync tool itself.

use serde::Serialize;
use tracing::{debug, warn};

use notesync_common::{Error, RepoId, Result};
use notesync_storage::{Release, ReleaseProvider};

/// Outcome of comparing the running version with the latest release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateStatus {
    pub current: String,
    pub latest: Option<Release>,
    pub update_available: bool,
}

/// Parse `v1.2.3`, `1.2.3` or `1.2` into a semver version.
pub fn parse_version(tag: &str) -> Result<semver::Version> {
    let trimmed = tag.trim();
    let bare = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    semver::Version::parse(bare)
        .or_else(|_| semver::Version::parse(&format!("{}.0", bare)))
        .map_err(|e| Error::InvalidInput(format!("Invalid version {:?}: {}", tag, e)))
}

/// Compare `current` with the latest release published in `repo`.
///
/// A release tag that is not a version never counts as an update.
pub async fn check_for_update<P: ReleaseProvider + ?Sized>(
    provider: &P,
    repo: &RepoId,
    current: &str,
) -> Result<UpdateStatus> {
    let current_version = parse_version(current)?;
    let latest = provider.latest_release(repo).await?;

    let update_available = match &latest {
        Some(release) => match parse_version(&release.tag) {
            Ok(version) => version > current_version,
            Err(e) => {
                warn!("Ignoring release {}: {}", release.tag, e);
                false
            }
        },
        None => false,
    };

    debug!(
        "Current {}, latest {:?}, update available: {}",
        current,
        latest.as_ref().map(|r| r.tag.as_str()),
        update_available
    );

    Ok(UpdateStatus {
        current: current.to_string(),
        latest,
        update_available,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notesync_storage::MemoryRemote;

    fn release(tag: &str) -> Release {
        Release {
            tag: tag.to_string(),
            name: None,
            published_at: None,
            body: None,
        }
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("v1.2.3").unwrap(), semver::Version::new(1, 2, 3));
        assert_eq!(parse_version("1.4").unwrap(), semver::Version::new(1, 4, 0));
        assert!(parse_version("latest").is_err());
    }

    #[tokio::test]
    async fn test_update_available() {
        let repo = RepoId::new("notesync", "notesync").unwrap();
        let remote = MemoryRemote::new(repo.clone(), "main");

        let status = check_for_update(&remote, &repo, "0.1.0").await.unwrap();
        assert!(!status.update_available);
        assert!(status.latest.is_none());

        remote.set_release(Some(release("v0.2.0"))).await;
        let status = check_for_update(&remote, &repo, "0.1.0").await.unwrap();
        assert!(status.update_available);

        let status = check_for_update(&remote, &repo, "0.2.0").await.unwrap();
        assert!(!status.update_available);

        remote.set_release(Some(release("nightly"))).await;
        let status = check_for_update(&remote, &repo, "0.1.0").await.unwrap();
        assert!(!status.update_available);
    }
}
