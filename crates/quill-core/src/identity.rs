//! Who is commenting: a stable anonymous client id plus an optional
//! server-confirmed display name.
//!
//! Both values live in the persisted store so they survive reloads and are
//! shared by every thread using that store. When storage is unavailable the
//! provider keeps working from in-memory copies for the rest of the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::model::{ANONYMOUS_LABEL, CommentRecord, labels_match};
use crate::store::{PersistedStore, StoreChange};

/// Snapshot of the current identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub client_id: String,
    pub display_name: Option<String>,
}

impl Identity {
    /// Whether this identity may delete `record`: the owner token matches
    /// the client id, or the author label matches the display name.
    #[must_use]
    pub fn owns(&self, record: &CommentRecord) -> bool {
        if !record.owner_token.is_empty() && record.owner_token == self.client_id {
            return true;
        }
        self.display_name
            .as_deref()
            .is_some_and(|name| labels_match(&record.author_label, name))
    }
}

/// Generate a fresh client id: 32 hex chars of a BLAKE3 digest over random
/// bytes mixed with the current time.
#[must_use]
pub fn generate_client_id(now_ms: i64) -> String {
    let noise: u128 = rand::random();
    let mut hasher = blake3::Hasher::new();
    hasher.update(&noise.to_le_bytes());
    hasher.update(&now_ms.to_le_bytes());
    hasher.finalize().to_hex().as_str()[..32].to_string()
}

/// A display name that may stand for an identity: trimmed, non-empty and
/// not the anonymous label.
fn claimable_name(name: &str) -> Option<&str> {
    let name = name.trim();
    (!name.is_empty() && !labels_match(name, ANONYMOUS_LABEL)).then_some(name)
}

/// Receivers for identity changes made through the shared store.
#[derive(Debug)]
pub struct IdentityWatch {
    client_id: Receiver<StoreChange>,
    display_name: Receiver<StoreChange>,
}

impl IdentityWatch {
    /// Drain pending notifications. Returns `true` if anything changed.
    pub fn drain(&self) -> bool {
        let client_changed = self.client_id.try_iter().count() > 0;
        let name_changed = self.display_name.try_iter().count() > 0;
        client_changed || name_changed
    }
}

/// Reads and writes the identity keys of one storage namespace.
pub struct IdentityProvider {
    store: Arc<dyn PersistedStore>,
    clock: Arc<dyn Clock>,
    client_key: String,
    name_key: String,
    memory_client_id: Mutex<Option<String>>,
    memory_display_name: Mutex<Option<String>>,
    name_unpersisted: AtomicBool,
}

impl IdentityProvider {
    pub fn new(store: Arc<dyn PersistedStore>, clock: Arc<dyn Clock>, namespace: &str) -> Self {
        Self {
            store,
            clock,
            client_key: format!("{namespace}:clientId"),
            name_key: format!("{namespace}:displayName"),
            memory_client_id: Mutex::new(None),
            memory_display_name: Mutex::new(None),
            name_unpersisted: AtomicBool::new(false),
        }
    }

    /// Store key holding the client id.
    #[must_use]
    pub fn client_key(&self) -> &str {
        &self.client_key
    }

    /// Store key holding the display name.
    #[must_use]
    pub fn name_key(&self) -> &str {
        &self.name_key
    }

    /// Return the persisted client id, creating and persisting one if absent.
    ///
    /// Never fails: if storage is unavailable the id lives in memory for the
    /// rest of the session.
    pub fn get_or_create_client_id(&self) -> String {
        let mut memory = self
            .memory_client_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match self.store.get(&self.client_key) {
            Ok(Some(id)) if !id.trim().is_empty() => {
                *memory = Some(id.clone());
                return id;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "client id unreadable; using in-memory identity");
                if let Some(id) = memory.as_ref() {
                    return id.clone();
                }
            }
        }

        let id = memory
            .clone()
            .unwrap_or_else(|| generate_client_id(self.clock.now_millis()));
        if let Err(err) = self.store.set(&self.client_key, &id) {
            warn!(error = %err, "client id not persisted; it will not survive a reload");
        } else {
            debug!(client_id = %id, "persisted new client id");
        }
        *memory = Some(id.clone());
        id
    }

    /// The cached server-confirmed display name, if any.
    ///
    /// After a change failed to persist, the in-memory copy wins until a
    /// later change persists.
    pub fn cached_display_name(&self) -> Option<String> {
        let memory = || {
            self.memory_display_name
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        };
        if self.name_unpersisted.load(Ordering::SeqCst) {
            return memory();
        }
        match self.store.get(&self.name_key) {
            Ok(value) => value.as_deref().and_then(claimable_name).map(str::to_string),
            Err(err) => {
                debug!(error = %err, "display name unreadable; using in-memory copy");
                memory()
            }
        }
    }

    /// Cache `name`, or remove the cached name when `None`, blank or the
    /// anonymous label.
    ///
    /// Every subscriber of the shared store is notified.
    pub fn set_cached_display_name(&self, name: Option<&str>) {
        let name = name.and_then(claimable_name);
        *self
            .memory_display_name
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = name.map(ToString::to_string);

        let result = match name {
            Some(name) => self.store.set(&self.name_key, name),
            None => self.store.remove(&self.name_key),
        };
        let failed = result.is_err();
        if let Err(err) = result {
            warn!(error = %err, "display name change not persisted; keeping it in memory");
        }
        self.name_unpersisted.store(failed, Ordering::SeqCst);
    }

    /// Current identity, creating the client id if needed.
    pub fn identity(&self) -> Identity {
        Identity {
            client_id: self.get_or_create_client_id(),
            display_name: self.cached_display_name(),
        }
    }

    /// Subscribe to changes of either identity key.
    pub fn watch(&self) -> IdentityWatch {
        IdentityWatch {
            client_id: self.store.subscribe(&self.client_key),
            display_name: self.store.subscribe(&self.name_key),
        }
    }
}

impl std::fmt::Debug for IdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityProvider")
            .field("client_key", &self.client_key)
            .field("name_key", &self.name_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn provider(store: &Arc<MemoryStore>) -> IdentityProvider {
        IdentityProvider::new(store.clone(), Arc::new(ManualClock::new(1_000)), "dt")
    }

    #[test]
    fn client_id_is_created_once_and_persisted() {
        let store = Arc::new(MemoryStore::new());
        let ids = provider(&store);

        let first = ids.get_or_create_client_id();
        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(store.peek("dt:clientId").as_deref(), Some(first.as_str()));

        // A second provider over the same store (another tab) sees the same id.
        assert_eq!(provider(&store).get_or_create_client_id(), first);
        assert_eq!(ids.get_or_create_client_id(), first);
    }

    #[test]
    fn existing_client_id_is_never_regenerated() {
        let store = Arc::new(MemoryStore::new());
        store.set("dt:clientId", "legacy-id").unwrap();
        assert_eq!(provider(&store).get_or_create_client_id(), "legacy-id");
    }

    #[test]
    fn unavailable_storage_falls_back_to_memory() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let ids = provider(&store);

        let first = ids.get_or_create_client_id();
        assert_eq!(ids.get_or_create_client_id(), first);
        assert!(store.keys().is_empty());

        ids.set_cached_display_name(Some("Ana"));
        assert_eq!(ids.cached_display_name().as_deref(), Some("Ana"));
    }

    #[test]
    fn generated_ids_differ() {
        assert_ne!(generate_client_id(5), generate_client_id(5));
    }

    #[test]
    fn display_name_set_and_clear() {
        let store = Arc::new(MemoryStore::new());
        let ids = provider(&store);
        assert_eq!(ids.cached_display_name(), None);

        ids.set_cached_display_name(Some("  Ana  "));
        assert_eq!(ids.cached_display_name().as_deref(), Some("Ana"));

        ids.set_cached_display_name(Some("   "));
        assert_eq!(ids.cached_display_name(), None);
        assert_eq!(store.peek("dt:displayName"), None);
    }

    #[test]
    fn display_name_survives_quota_exhaustion() {
        let store = Arc::new(MemoryStore::with_quota(40));
        let ids = provider(&store);

        ids.set_cached_display_name(Some("A very long display name that overflows"));
        assert_eq!(store.peek("dt:displayName"), None);
        assert_eq!(
            ids.cached_display_name().as_deref(),
            Some("A very long display name that overflows")
        );

        ids.set_cached_display_name(Some("Ana"));
        assert_eq!(store.peek("dt:displayName").as_deref(), Some("Ana"));
        assert_eq!(ids.cached_display_name().as_deref(), Some("Ana"));
    }

    #[test]
    fn anonymous_label_is_never_cached() {
        let store = Arc::new(MemoryStore::new());
        let ids = provider(&store);
        ids.set_cached_display_name(Some("Ana"));

        ids.set_cached_display_name(Some(" anonymous "));
        assert_eq!(ids.cached_display_name(), None);
        assert_eq!(store.peek("dt:displayName"), None);

        store.set("dt:displayName", "Anonymous").unwrap();
        assert_eq!(ids.cached_display_name(), None);

        let unnamed = CommentRecord::authoritative("srv-1", None, "no name here", 1);
        assert!(!ids.identity().owns(&unnamed));
    }

    #[test]
    fn display_name_changes_reach_other_watchers() {
        let store = Arc::new(MemoryStore::new());
        let tab_a = provider(&store);
        let tab_b = provider(&store);
        let watch_b = tab_b.watch();

        assert!(!watch_b.drain());
        tab_a.set_cached_display_name(Some("Ana"));
        assert!(watch_b.drain());
        assert!(!watch_b.drain());
        assert_eq!(tab_b.cached_display_name().as_deref(), Some("Ana"));
    }

    #[test]
    fn ownership_by_token_or_name() {
        let me = Identity {
            client_id: "c1".into(),
            display_name: Some("Ana".into()),
        };
        let mut record = CommentRecord::authoritative("1", Some("Bob"), "hello", 0);
        assert!(!me.owns(&record));

        record.owner_token = "c1".into();
        assert!(me.owns(&record));

        let by_name = CommentRecord::authoritative("2", Some("ANA"), "hello", 0);
        assert!(me.owns(&by_name));

        let anonymous = Identity {
            client_id: String::new(),
            display_name: None,
        };
        let unowned = CommentRecord::authoritative("3", None, "hello", 0);
        assert!(!anonymous.owns(&unowned));
    }
}
