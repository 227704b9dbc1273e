//! Contract with the remote comment source.
//!
//! Any non-success is a total failure of that call; the engine never
//! assumes partial success.

use crate::error::ErrorCode;
use crate::model::{CommentId, CommentRecord, SubjectKey};

/// What the server reports back for a created comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedComment {
    pub id: CommentId,
    /// Author name the server attributed the comment to, when it says.
    pub author_label: Option<String>,
    pub timestamp_ms: i64,
}

/// Failures of remote calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The request never got a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body could not be understood.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Transport(_) => ErrorCode::RemoteTransport,
            Self::Status { .. } => ErrorCode::RemoteStatus,
            Self::Decode(_) => ErrorCode::RemoteDecode,
        }
    }
}

/// The authoritative comment service.
pub trait RemoteComments: Send + Sync {
    /// All comments for `subject`. Ordering is not guaranteed.
    fn list_comments(&self, subject: &SubjectKey) -> Result<Vec<CommentRecord>, RemoteError>;

    fn create_comment(
        &self,
        subject: &SubjectKey,
        body: &str,
    ) -> Result<CreatedComment, RemoteError>;

    fn delete_comment(&self, id: &CommentId) -> Result<(), RemoteError>;
}
