//! quill-core library: optimistic comment threads reconciled against a
//! remote comment service.
//!
//! A [`thread::CommentThread`] shows one subject's comments. New comments
//! appear immediately as pending records, are persisted to a
//! [`store::PersistedStore`], and are folded into their server copies once
//! the remote source lists them.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod matcher;
pub mod model;
pub mod reconcile;
pub mod remote;
pub mod retry;
pub mod sim;
pub mod store;
pub mod thread;

pub use error::{ErrorCode, MutationError};
pub use model::{CommentId, CommentRecord, SubjectKey};
pub use remote::{CreatedComment, RemoteComments, RemoteError};
pub use thread::{
    Collaborators, CommentThread, LoadReport, ReconcileOutcome, SubmitReport, ThreadState,
};

/// # Conventions
///
/// - **Errors**: `thiserror` enums for engine failures; `anyhow::Result` for
///   config loading.
/// - **Logging**: Use `tracing` macros (`info!`, `warn!`, `debug!`). Storage
///   and cache failures are logged and degraded, never raised.
pub fn init() {
    tracing::debug!("quill-core initialized");
}
