//! Disk Store Backends
//!
//! Secondary storage for overflowed values. The store holds opaque values keyed by
//! region key; it knows nothing about eviction.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::region::{EntryKey, EntryValue};

/// Disk store backend trait
pub trait DiskStore: Send + Sync {
    /// Write a value, replacing any previous one
    fn write(&self, key: &EntryKey, value: &EntryValue) -> Result<()>;

    /// Read a value back
    fn read(&self, key: &EntryKey) -> Result<Option<EntryValue>>;

    /// Delete a value; returns true if one was present
    fn delete(&self, key: &EntryKey) -> Result<bool>;

    /// Get store statistics
    fn stats(&self) -> DiskStoreStats;
}

/// Disk store statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiskStoreStats {
    /// Values currently stored
    pub object_count: u64,
    /// Read operations
    pub reads: u64,
    /// Write operations
    pub writes: u64,
    /// Delete operations
    pub deletes: u64,
}

#[derive(Debug, Default)]
struct StoreCounters {
    object_count: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl StoreCounters {
    fn snapshot(&self) -> DiskStoreStats {
        DiskStoreStats {
            object_count: self.object_count.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// In-memory disk store for tests and simulations
#[derive(Debug, Default)]
pub struct InMemoryDiskStore {
    storage: DashMap<EntryKey, EntryValue>,
    counters: StoreCounters,
    /// When set, every write fails (failure injection)
    fail_writes: AtomicBool,
}

impl InMemoryDiskStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Check if a key is stored
    pub fn contains(&self, key: &EntryKey) -> bool {
        self.storage.contains_key(key)
    }
}

impl DiskStore for InMemoryDiskStore {
    fn write(&self, key: &EntryKey, value: &EntryValue) -> Result<()> {
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(Error::Io(std::io::Error::new(
                ErrorKind::Other,
                "injected write failure",
            )));
        }

        if self.storage.insert(key.clone(), value.clone()).is_none() {
            self.counters.object_count.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn read(&self, key: &EntryKey) -> Result<Option<EntryValue>> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.storage.get(key).map(|v| v.value().clone()))
    }

    fn delete(&self, key: &EntryKey) -> Result<bool> {
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        if self.storage.remove(key).is_some() {
            self.counters.object_count.fetch_sub(1, Ordering::Relaxed);
            return Ok(true);
        }
        Ok(false)
    }

    fn stats(&self) -> DiskStoreStats {
        self.counters.snapshot()
    }
}

// =============================================================================
// File-backed store
// =============================================================================

#[derive(Serialize, Deserialize)]
struct StoredRecord {
    key: EntryKey,
    value: EntryValue,
}

/// One JSON file per overflowed value under a directory
#[derive(Debug)]
pub struct FileDiskStore {
    dir: PathBuf,
    counters: StoreCounters,
}

impl FileDiskStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let existing = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .count() as u64;
        debug!("Opened disk store at {} with {} values", dir.display(), existing);

        let counters = StoreCounters::default();
        counters.object_count.store(existing, Ordering::Relaxed);
        Ok(Self { dir, counters })
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &EntryKey) -> PathBuf {
        let bytes = key.as_str().as_bytes();
        let name = if bytes.len() <= 100 {
            bytes.iter().map(|b| format!("{b:02x}")).collect::<String>()
        } else {
            format!("h{:016x}-{}", key.hash_code(), bytes.len())
        };
        self.dir.join(format!("{name}.json"))
    }
}

impl DiskStore for FileDiskStore {
    fn write(&self, key: &EntryKey, value: &EntryValue) -> Result<()> {
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));

        let record = StoredRecord {
            key: key.clone(),
            value: value.clone(),
        };
        fs::write(&tmp, serde_json::to_vec(&record)?)?;

        let existed = path.exists();
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        if !existed {
            self.counters.object_count.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn read(&self, key: &EntryKey) -> Result<Option<EntryValue>> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let data = match fs::read(self.path_for(key)) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: StoredRecord = serde_json::from_slice(&data)?;
        // Long keys share hashed file names
        if &record.key != key {
            return Ok(None);
        }
        Ok(Some(record.value))
    }

    fn delete(&self, key: &EntryKey) -> Result<bool> {
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => {
                self.counters.object_count.fetch_sub(1, Ordering::Relaxed);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn stats(&self) -> DiskStoreStats {
        self.counters.snapshot()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("region-evict-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_in_memory_write_read_delete() {
        let store = InMemoryDiskStore::new();
        let key = EntryKey::new("k");

        store.write(&key, &EntryValue::text("v")).unwrap();
        assert_eq!(store.read(&key).unwrap(), Some(EntryValue::text("v")));
        assert!(store.contains(&key));

        assert!(store.delete(&key).unwrap());
        assert!(!store.delete(&key).unwrap());
        assert_eq!(store.read(&key).unwrap(), None);
    }

    #[test]
    fn test_in_memory_stats() {
        let store = InMemoryDiskStore::new();
        store.write(&EntryKey::new("a"), &EntryValue::Int(1)).unwrap();
        store.write(&EntryKey::new("a"), &EntryValue::Int(2)).unwrap();
        store.write(&EntryKey::new("b"), &EntryValue::Int(3)).unwrap();
        store.read(&EntryKey::new("a")).unwrap();
        store.delete(&EntryKey::new("b")).unwrap();

        let stats = store.stats();
        assert_eq!(stats.object_count, 1);
        assert_eq!(stats.writes, 3);
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.deletes, 1);
    }

    #[test]
    fn test_in_memory_injected_failure() {
        let store = InMemoryDiskStore::new();
        store.set_fail_writes(true);
        assert_matches!(
            store.write(&EntryKey::new("k"), &EntryValue::Null),
            Err(Error::Io(_))
        );
        store.set_fail_writes(false);
        assert!(store.write(&EntryKey::new("k"), &EntryValue::Null).is_ok());
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = temp_dir();
        let store = FileDiskStore::open(&dir).unwrap();
        let key = EntryKey::new("orders/1");
        let value = EntryValue::List(vec![EntryValue::Int(1), EntryValue::text("x")]);

        store.write(&key, &value).unwrap();
        assert_eq!(store.read(&key).unwrap(), Some(value));
        assert_eq!(store.stats().object_count, 1);

        // Reopening sees the persisted value
        let reopened = FileDiskStore::open(&dir).unwrap();
        assert_eq!(reopened.stats().object_count, 1);
        assert!(reopened.delete(&key).unwrap());
        assert_eq!(reopened.read(&key).unwrap(), None);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_store_long_keys() {
        let dir = temp_dir();
        let store = FileDiskStore::open(&dir).unwrap();
        let key = EntryKey::new("x".repeat(500));

        store.write(&key, &EntryValue::Bool(true)).unwrap();
        assert_eq!(store.read(&key).unwrap(), Some(EntryValue::Bool(true)));

        fs::remove_dir_all(&dir).unwrap();
    }
}
