//! Per-subject persisted comment lists.
//!
//! Each subject's list is stored as one JSON array under
//! `{namespace}:cmt:{subject}`, newest first, capped at the configured
//! capacity. Reads never fail (missing or corrupt data loads as an empty
//! list) and writes never interrupt the caller (failures are logged).

use std::sync::Arc;

use tracing::{debug, warn};

use crate::model::{CommentRecord, SubjectKey, dedupe_by_id, retain_most_recent};
use crate::store::PersistedStore;

/// Default number of records kept per subject.
pub const DEFAULT_CAPACITY: usize = 200;

pub struct CommentCache {
    store: Arc<dyn PersistedStore>,
    namespace: String,
    capacity: usize,
}

impl CommentCache {
    pub fn new(store: Arc<dyn PersistedStore>, namespace: &str, capacity: usize) -> Self {
        Self {
            store,
            namespace: namespace.to_string(),
            capacity,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Store key for a subject's list.
    #[must_use]
    pub fn key_for(&self, subject: &SubjectKey) -> String {
        format!("{}:cmt:{subject}", self.namespace)
    }

    /// Load a subject's list. Returns an empty list on missing, unreadable
    /// or corrupt data; duplicate ids keep their first occurrence.
    #[must_use]
    pub fn load(&self, subject: &SubjectKey) -> Vec<CommentRecord> {
        let key = self.key_for(subject);
        let raw = match self.store.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!(%key, error = %err, "comment cache unreadable");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<CommentRecord>>(&raw) {
            Ok(records) => {
                let records = dedupe_by_id(records);
                debug!(%key, count = records.len(), "loaded cached comments");
                records
            }
            Err(err) => {
                warn!(%key, error = %err, "discarding corrupt comment cache");
                Vec::new()
            }
        }
    }

    /// Persist a subject's list, truncated to the capacity.
    ///
    /// `records` must be newest-first; the tail beyond the capacity is
    /// dropped.
    pub fn save(&self, subject: &SubjectKey, records: &[CommentRecord]) {
        let key = self.key_for(subject);
        let mut kept = records.to_vec();
        let evicted = retain_most_recent(&mut kept, self.capacity);
        if !evicted.is_empty() {
            debug!(%key, evicted = evicted.len(), "evicted oldest cached comments");
        }

        let encoded = match serde_json::to_string(&kept) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(%key, error = %err, "comment list not encodable; skipping save");
                return;
            }
        };
        if let Err(err) = self.store.set(&key, &encoded) {
            warn!(%key, error = %err, "comment cache not persisted");
        }
    }

    /// Forget a subject's list.
    pub fn clear(&self, subject: &SubjectKey) {
        let key = self.key_for(subject);
        if let Err(err) = self.store.remove(&key) {
            warn!(%key, error = %err, "comment cache not cleared");
        }
    }
}

impl std::fmt::Debug for CommentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommentCache")
            .field("namespace", &self.namespace)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
