use std::fmt;

use crate::model::{CommentId, SubjectKey};
use crate::remote::RemoteError;

/// Machine-readable error codes for hosts that branch on failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    BodyTooShort,
    SubmitInFlight,
    CommentNotFound,
    NotPermitted,
    StorageUnavailable,
    StorageQuotaExceeded,
    StorageCorrupt,
    RemoteTransport,
    RemoteStatus,
    RemoteDecode,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::BodyTooShort => "E2001",
            Self::SubmitInFlight => "E2002",
            Self::CommentNotFound => "E2003",
            Self::NotPermitted => "E2004",
            Self::StorageUnavailable => "E3001",
            Self::StorageQuotaExceeded => "E3002",
            Self::StorageCorrupt => "E3003",
            Self::RemoteTransport => "E4001",
            Self::RemoteStatus => "E4002",
            Self::RemoteDecode => "E4003",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::BodyTooShort => "Comment body too short",
            Self::SubmitInFlight => "A comment is already being submitted",
            Self::CommentNotFound => "Comment not found",
            Self::NotPermitted => "Not permitted to delete this comment",
            Self::StorageUnavailable => "Local storage unavailable",
            Self::StorageQuotaExceeded => "Local storage quota exceeded",
            Self::StorageCorrupt => "Local storage entry is corrupt",
            Self::RemoteTransport => "Comment API unreachable",
            Self::RemoteStatus => "Comment API rejected the request",
            Self::RemoteDecode => "Comment API returned an unexpected payload",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to users.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in quill/config.toml and retry."),
            Self::BodyTooShort => Some("Write at least a few characters before posting."),
            Self::SubmitInFlight => Some("Wait for the previous comment to finish posting."),
            Self::CommentNotFound => None,
            Self::NotPermitted => Some("Only the author of a comment can delete it."),
            Self::StorageUnavailable | Self::StorageQuotaExceeded => {
                Some("Comments still work but will not survive a reload.")
            }
            Self::StorageCorrupt => Some("Clear the cached thread and reload."),
            Self::RemoteTransport => Some("Check the network connection and retry."),
            Self::RemoteStatus => None,
            Self::RemoteDecode => Some("Check that the API base URL points at the comment service."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Reasons a submit or remove was refused or undone.
///
/// Validation and permission failures are raised before any state changes.
/// A [`MutationError::Remote`] is raised after the optimistic change has
/// been rolled back.
#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error("comment body must be at least {min} characters (got {len})")]
    BodyTooShort { len: usize, min: usize },

    #[error("a comment is already being submitted for {subject}")]
    SubmitInFlight { subject: SubjectKey },

    #[error("comment {id} not found")]
    NotFound { id: CommentId },

    #[error("not permitted to delete comment {id}")]
    NotPermitted { id: CommentId },

    #[error("remote call failed: {0}")]
    Remote(#[from] RemoteError),
}

impl MutationError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::BodyTooShort { .. } => ErrorCode::BodyTooShort,
            Self::SubmitInFlight { .. } => ErrorCode::SubmitInFlight,
            Self::NotFound { .. } => ErrorCode::CommentNotFound,
            Self::NotPermitted { .. } => ErrorCode::NotPermitted,
            Self::Remote(err) => err.code(),
        }
    }

    /// Whether the local list was changed and then restored.
    #[must_use]
    pub const fn was_rolled_back(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}
