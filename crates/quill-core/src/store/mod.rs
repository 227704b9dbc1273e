//! Persisted key-value storage behind the comment engine.
//!
//! The engine never touches ambient storage directly. Hosts inject a
//! [`PersistedStore`]: [`MemoryStore`] for tests and embedded use,
//! [`FileStore`] for a terminal host. Every operation may fail (storage
//! disabled, quota exceeded); callers in this crate log the failure and keep
//! working from memory.
//!
//! Stores also deliver change notifications for individual keys, which is
//! how an identity change made by one thread becomes visible to every other
//! thread sharing the same storage area.

pub mod file;
pub mod memory;

use std::io;
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};

use crate::error::ErrorCode;

pub use file::FileStore;
pub use memory::MemoryStore;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Errors raised by persisted stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Storage is disabled for this session.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Writing `bytes` under `key` would exceed the storage quota.
    #[error("storage quota exceeded writing {bytes} bytes to {key}")]
    QuotaExceeded { key: String, bytes: usize },

    /// Backing file could not be read or written.
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),

    /// Backing file exists but does not hold a valid key-value document.
    #[error("storage document is corrupt: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Unavailable(_) | Self::Io(_) => ErrorCode::StorageUnavailable,
            Self::QuotaExceeded { .. } => ErrorCode::StorageQuotaExceeded,
            Self::Corrupt(_) => ErrorCode::StorageCorrupt,
        }
    }
}

/// A value change for one key. `value` is `None` after a removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub key: String,
    pub value: Option<String>,
}

/// Synchronous string key-value storage shared by every comment thread of
/// one browser profile (or one data directory).
pub trait PersistedStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Receive a [`StoreChange`] every time `key` is set or removed through
    /// this store, by any holder.
    fn subscribe(&self, key: &str) -> Receiver<StoreChange>;
}

// ---------------------------------------------------------------------------
// Watchers
// ---------------------------------------------------------------------------

/// Per-key fan-out of change notifications. Subscribers whose receiver was
/// dropped are pruned on the next notification.
#[derive(Debug, Default)]
pub(crate) struct Watchers {
    senders: Mutex<Vec<(String, Sender<StoreChange>)>>,
}

impl Watchers {
    pub(crate) fn subscribe(&self, key: &str) -> Receiver<StoreChange> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut senders) = self.senders.lock() {
            senders.push((key.to_string(), tx));
        }
        rx
    }

    pub(crate) fn notify(&self, key: &str, value: Option<&str>) {
        let Ok(mut senders) = self.senders.lock() else {
            return;
        };
        senders.retain(|(watched, tx)| {
            if watched != key {
                return true;
            }
            tx.send(StoreChange {
                key: key.to_string(),
                value: value.map(ToString::to_string),
            })
            .is_ok()
        });
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.senders.lock().map_or(0, |senders| senders.len())
    }
}
