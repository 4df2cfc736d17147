//! Durable storage for the cached datafile.
//!
//! Storage and time are capabilities handed to the client rather than globals, so
//! tests can swap in an in-memory store and a manual clock.

use crate::error::{DatafileError, StorageError};
use crate::model::{CacheEntry, Datafile};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// A string key-value store that survives restarts.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Process-local store. The default when no store is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Stores each key as a JSON file in a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (and creates, if needed) the store directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path(key);
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, value)?;
        if let Err(e) = fs::rename(&staging, &path) {
            let _ = fs::remove_file(&staging);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// The datafile cache entry under one key.
#[derive(Clone)]
pub struct DatafileCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    key: String,
}

impl DatafileCache {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, key: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn read(&self) -> Result<Option<CacheEntry>, DatafileError> {
        let Some(raw) = self.store.get(&self.key)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|_| DatafileError::Parse { body: raw })
    }

    /// Stores `datafile` stamped with the current time.
    pub fn write(&self, datafile: &Datafile) -> Result<(), DatafileError> {
        let entry = CacheEntry::new(datafile.clone(), self.clock.now_ms());
        let raw = serde_json::to_string(&entry).map_err(|e| StorageError::Backend(e.to_string()))?;
        self.store.set(&self.key, &raw)?;
        debug!(key = %self.key, revision = ?datafile.revision(), "Datafile cached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedClock(i64);

    impl Clock for FixedClock {
        fn now_ms(&self) -> i64 {
            self.0
        }
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_file_store_persists_between_instances() {
        let dir = tempfile::tempdir().unwrap();

        FileStore::open(dir.path()).unwrap().set("optly_fs_datafile", "{}").unwrap();
        let reopened = FileStore::open(dir.path()).unwrap();

        assert_eq!(reopened.get("optly_fs_datafile").unwrap().as_deref(), Some("{}"));
        assert_eq!(reopened.get("other").unwrap(), None);
    }

    #[test]
    fn test_file_store_sanitizes_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.set("../escape", "x").unwrap();
        assert!(dir.path().join("___escape.json").exists());
    }

    #[test]
    fn test_file_store_failed_write_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        // a directory where the entry should go makes the final rename fail
        let blocked = dir.path().join("key.json");
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("inner"), "x").unwrap();

        assert!(matches!(store.set("key", "{}"), Err(StorageError::Io(_))));
        assert!(!dir.path().join("key.json.tmp").exists());
    }

    #[test]
    fn test_cache_write_stamps_clock() {
        let store = Arc::new(MemoryStore::new());
        let cache = DatafileCache::new(store.clone(), Arc::new(FixedClock(1234)), "key");

        cache.write(&Datafile::new(json!({"revision": "3"}))).unwrap();

        let entry = cache.read().unwrap().unwrap();
        assert_eq!(entry.metadata.timestamp_cached, 1234);
        assert_eq!(entry.datafile.revision(), Some("3"));
    }

    #[test]
    fn test_cache_read_reports_corrupt_entry() {
        let store = Arc::new(MemoryStore::new());
        store.set("key", "not json").unwrap();
        let cache = DatafileCache::new(store, Arc::new(FixedClock(0)), "key");

        assert!(matches!(cache.read(), Err(DatafileError::Parse { body }) if body == "not json"));
    }
}
