//! In-memory [`PersistedStore`], shareable between threads of one process.
//!
//! Models the failure modes of browser storage: it can be switched
//! unavailable (private browsing) and can enforce a byte quota over the sum
//! of key and value lengths.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::mpsc::Receiver;

use super::{PersistedStore, StoreChange, StoreError, Watchers};

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<String, String>,
    unavailable: bool,
    quota_bytes: Option<usize>,
}

impl Inner {
    fn used_bytes_without(&self, key: &str) -> usize {
        self.entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

/// Map-backed store with change notifications.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    watchers: Watchers,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects writes once `quota_bytes` would be exceeded.
    #[must_use]
    pub fn with_quota(quota_bytes: usize) -> Self {
        let store = Self::default();
        store.lock().quota_bytes = Some(quota_bytes);
        store
    }

    /// Switch the store on or off. While off every operation fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    /// Raw value under `key`, bypassing availability. Test and inspection aid.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<String> {
        self.lock().entries.get(key).cloned()
    }

    /// All keys currently stored.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.lock().entries.keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the map half-written.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check_available(inner: &Inner) -> Result<(), StoreError> {
        if inner.unavailable {
            return Err(StoreError::Unavailable("storage disabled".to_string()));
        }
        Ok(())
    }
}

impl PersistedStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let inner = self.lock();
        Self::check_available(&inner)?;
        Ok(inner.entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        {
            let mut inner = self.lock();
            Self::check_available(&inner)?;

            if let Some(quota) = inner.quota_bytes {
                let needed = inner.used_bytes_without(key) + key.len() + value.len();
                if needed > quota {
                    return Err(StoreError::QuotaExceeded {
                        key: key.to_string(),
                        bytes: value.len(),
                    });
                }
            }

            inner.entries.insert(key.to_string(), value.to_string());
        }
        self.watchers.notify(key, Some(value));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        {
            let mut inner = self.lock();
            Self::check_available(&inner)?;
            inner.entries.remove(key);
        }
        self.watchers.notify(key, None);
        Ok(())
    }

    fn subscribe(&self, key: &str) -> Receiver<StoreChange> {
        self.watchers.subscribe(key)
    }
}
