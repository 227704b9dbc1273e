//! File-backed [`PersistedStore`] for terminal hosts.
//!
//! # Layout
//!
//! ```text
//! <dir>/
//!   store.json    # one JSON object: key -> string value
//!   store.lock    # advisory lock guarding read-modify-write cycles
//! ```
//!
//! Writes take an exclusive `fs2` lock, rewrite the whole document into a
//! temporary file and rename it over `store.json`, so readers never observe
//! a torn document. Change notifications reach subscribers of this
//! `FileStore` value only; other processes see the new value on their next
//! read.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;

use fs2::FileExt;
use tracing::warn;

use super::{PersistedStore, StoreChange, StoreError, Watchers};

const DATA_FILE: &str = "store.json";
const LOCK_FILE: &str = "store.lock";

/// RAII advisory lock on `store.lock`.
struct LockGuard {
    file: File,
}

impl LockGuard {
    fn acquire(path: &Path, exclusive: bool) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        if exclusive {
            FileExt::lock_exclusive(&file)?;
        } else {
            FileExt::lock_shared(&file)?;
        }
        Ok(Self { file })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Key-value document in a directory.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    watchers: Watchers,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            watchers: Watchers::default(),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn data_path(&self) -> PathBuf {
        self.dir.join(DATA_FILE)
    }

    fn read_document(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let path = self.data_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(err.into()),
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content)
            .map_err(|err| StoreError::Corrupt(format!("{}: {err}", path.display())))
    }

    fn write_document(&self, document: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let encoded = serde_json::to_string_pretty(document)
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;

        let tmp_path = self.dir.join(format!("{DATA_FILE}.tmp"));
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(encoded.as_bytes())?;
            tmp.flush()?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, self.data_path())?;
        Ok(())
    }

    /// Read-modify-write under the exclusive lock. A corrupt document is
    /// replaced rather than blocking every future write.
    fn update(
        &self,
        apply: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), StoreError> {
        let _guard = LockGuard::acquire(&self.dir.join(LOCK_FILE), true)?;
        let mut document = match self.read_document() {
            Ok(document) => document,
            Err(StoreError::Corrupt(reason)) => {
                warn!(%reason, "replacing corrupt store document");
                BTreeMap::new()
            }
            Err(err) => return Err(err),
        };
        apply(&mut document);
        self.write_document(&document)
    }
}

impl PersistedStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = LockGuard::acquire(&self.dir.join(LOCK_FILE), false)?;
        Ok(self.read_document()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(|document| {
            document.insert(key.to_string(), value.to_string());
        })?;
        self.watchers.notify(key, Some(value));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(|document| {
            document.remove(key);
        })?;
        self.watchers.notify(key, None);
        Ok(())
    }

    fn subscribe(&self, key: &str) -> Receiver<StoreChange> {
        self.watchers.subscribe(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn values_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = FileStore::open(tmp.path()).unwrap();
            store.set("dt:clientId", "abc").unwrap();
            store.set("dt:cmt:post-1", "[]").unwrap();
            store.remove("dt:cmt:post-1").unwrap();
        }

        let store = FileStore::open(tmp.path()).unwrap();
        assert_eq!(store.get("dt:clientId").unwrap().as_deref(), Some("abc"));
        assert_eq!(store.get("dt:cmt:post-1").unwrap(), None);
    }

    #[test]
    fn missing_directory_is_created() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("a/b/c");
        let store = FileStore::open(&nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(store.get("anything").unwrap(), None);
    }

    #[test]
    fn corrupt_document_reads_as_error_but_accepts_writes() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(DATA_FILE), "{not json").unwrap();
        let store = FileStore::open(tmp.path()).unwrap();

        assert!(matches!(store.get("k"), Err(StoreError::Corrupt(_))));
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn subscribers_are_notified_in_process() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        let rx = store.subscribe("dt:displayName");
        store.set("dt:displayName", "Ana").unwrap();
        let change = rx.try_recv().unwrap();
        assert_eq!(change.value.as_deref(), Some("Ana"));
    }
}
