//! Common error types for notesync.

use std::fmt;

use thiserror::Error;

/// Reason a glob pattern was rejected.
///
/// Rules are checked in a fixed order, so a pattern breaking several of
/// them always reports the same violation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PatternViolation {
    /// Empty or whitespace-only.
    EmptyPattern,
    /// Starts with `/`.
    AbsolutePathNotAllowed,
    /// Contains a character in 0x00-0x1F.
    ControlCharacterNotAllowed,
    /// Contains `***` or a longer run of stars.
    ConsecutiveWildcardNotAllowed,
    /// Longer than the maximum pattern length.
    PatternTooLong,
    /// Contains a character outside the allowed set.
    InvalidCharacter(char),
}

impl fmt::Display for PatternViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPattern => write!(f, "pattern is empty"),
            Self::AbsolutePathNotAllowed => write!(f, "absolute paths are not allowed"),
            Self::ControlCharacterNotAllowed => {
                write!(f, "control character not allowed")
            }
            Self::ConsecutiveWildcardNotAllowed => {
                write!(f, "more than two consecutive wildcards are not allowed")
            }
            Self::PatternTooLong => write!(f, "pattern is too long"),
            Self::InvalidCharacter(c) => write!(f, "invalid character {:?}", c),
        }
    }
}

/// Top-level error type for notesync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A path pattern failed validation.
    #[error("Invalid pattern {pattern:?}: {reason}")]
    Policy {
        pattern: String,
        reason: PatternViolation,
    },

    /// The remote reference moved since the plan was computed.
    #[error("Concurrent modification of {reference}: expected {expected}, found {actual}")]
    ConcurrentModification {
        reference: String,
        expected: String,
        actual: String,
    },

    /// Tree or commit object construction failed before the reference update.
    #[error("Partial tree failure: {0}")]
    PartialTreeFailure(String),

    /// The final reference update failed after objects were created.
    #[error("Reference update failed: {0}")]
    ReferenceUpdateFailure(String),

    /// A path is a file on one side and a directory on the other.
    #[error("Type conflict at {path}: {detail}")]
    TypeConflict { path: String, detail: String },

    /// Local content changed between planning and committing.
    #[error("Local file changed since the plan was computed: {0}")]
    LocalSnapshotChanged(String),

    /// Another sync attempt holds the reference.
    #[error("Sync already in progress for {0}")]
    SyncInProgress(String),

    /// Network or transport failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Credentials missing or rejected.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Operation not permitted by the remote.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Whether repeating the whole operation may succeed without user action.
    ///
    /// `ConcurrentModification` is excluded: it needs a fresh plan first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network(_)
                | Error::Io(_)
                | Error::PartialTreeFailure(_)
                | Error::ReferenceUpdateFailure(_)
        )
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Network("timeout".into()).is_retryable());
        assert!(Error::PartialTreeFailure("blob".into()).is_retryable());
        assert!(Error::ReferenceUpdateFailure("500".into()).is_retryable());
        assert!(!Error::ConcurrentModification {
            reference: "heads/main".into(),
            expected: "a".into(),
            actual: "b".into(),
        }
        .is_retryable());
        assert!(!Error::Policy {
            pattern: "/x".into(),
            reason: PatternViolation::AbsolutePathNotAllowed,
        }
        .is_retryable());
    }

    #[test]
    fn test_policy_error_message() {
        let err = Error::Policy {
            pattern: "a#b".into(),
            reason: PatternViolation::InvalidCharacter('#'),
        };
        assert_eq!(err.to_string(), "Invalid pattern \"a#b\": invalid character '#'");
    }
}
