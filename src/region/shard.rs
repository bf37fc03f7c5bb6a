//! Sharded Map
//!
//! Concurrent hashmap used as region storage.
//!
//! # Design
//!
//! - Each shard has its own RwLock, minimizing contention
//! - Shard count is rounded up to a power of two so the index is a mask
//! - Cache-line padding between shards prevents false sharing

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;
use parking_lot::RwLock;
use serde::Serialize;

/// Single shard containing a hashmap and statistics
pub struct Shard<K, V> {
    map: RwLock<HashMap<K, V>>,
    count: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl<K, V> Default for Shard<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Shard<K, V> {
    /// Create a new empty shard
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            count: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Get the number of entries in this shard
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed) as usize
    }

    /// Check if the shard is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl<K: Eq + Hash, V: Clone> Shard<K, V> {
    fn get(&self, key: &K) -> Option<V> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.map.read().get(key).cloned()
    }

    fn get_or_insert_with<F>(&self, key: K, f: F) -> V
    where
        F: FnOnce() -> V,
    {
        // Try read first
        if let Some(v) = self.get(&key) {
            return v;
        }

        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.map.write();

        // Double-check under write lock
        if let Some(v) = guard.get(&key) {
            return v.clone();
        }

        let value = f();
        guard.insert(key, value.clone());
        self.count.fetch_add(1, Ordering::Relaxed);
        value
    }

    fn remove_if<F>(&self, key: &K, predicate: F) -> Option<V>
    where
        F: FnOnce(&V) -> bool,
    {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.map.write();
        if !guard.get(key).is_some_and(predicate) {
            return None;
        }
        let removed = guard.remove(key);
        if removed.is_some() {
            self.count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    fn values(&self) -> Vec<V> {
        self.map.read().values().cloned().collect()
    }

    fn drain(&self) -> Vec<V> {
        let mut guard = self.map.write();
        self.count.store(0, Ordering::Relaxed);
        guard.drain().map(|(_, v)| v).collect()
    }
}

/// Sharded map with a runtime shard count
pub struct ShardedMap<K, V> {
    shards: Box<[CachePadded<Shard<K, V>>]>,
    mask: usize,
}

impl<K, V> ShardedMap<K, V> {
    /// Create a map with at least `shards` shards
    pub fn new(shards: usize) -> Self {
        let count = shards.max(1).next_power_of_two();
        let shards: Vec<CachePadded<Shard<K, V>>> =
            (0..count).map(|_| CachePadded::new(Shard::new())).collect();
        Self {
            shards: shards.into_boxed_slice(),
            mask: count - 1,
        }
    }

    /// Get the shard count
    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Get total number of entries across all shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    /// Check if the map is empty
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    /// Get detailed statistics
    pub fn stats(&self) -> ShardedMapStats {
        let shard_entry_counts: Vec<usize> = self.shards.iter().map(|s| s.len()).collect();
        ShardedMapStats {
            total_entries: shard_entry_counts.iter().sum(),
            total_reads: self.shards.iter().map(|s| s.read_count()).sum(),
            total_writes: self.shards.iter().map(|s| s.write_count()).sum(),
            shard_entry_counts,
        }
    }
}

impl<K: Eq + Hash, V: Clone> ShardedMap<K, V> {
    #[inline]
    fn shard(&self, key: &K) -> &Shard<K, V> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) & self.mask]
    }

    /// Get a value
    pub fn get(&self, key: &K) -> Option<V> {
        self.shard(key).get(key)
    }

    /// Get or insert with a closure
    pub fn get_or_insert_with<F>(&self, key: K, f: F) -> V
    where
        F: FnOnce() -> V,
    {
        self.shard(&key).get_or_insert_with(key, f)
    }

    /// Remove a value
    pub fn remove(&self, key: &K) -> Option<V> {
        self.shard(key).remove_if(key, |_| true)
    }

    /// Remove a value only if `predicate` accepts the current one
    pub fn remove_if<F>(&self, key: &K, predicate: F) -> Option<V>
    where
        F: FnOnce(&V) -> bool,
    {
        self.shard(key).remove_if(key, predicate)
    }

    /// Clone out every value
    pub fn values(&self) -> Vec<V> {
        self.shards.iter().flat_map(|s| s.values()).collect()
    }

    /// Remove and return every value
    pub fn drain(&self) -> Vec<V> {
        self.shards.iter().flat_map(|s| s.drain()).collect()
    }
}

/// Statistics for a sharded map
#[derive(Debug, Clone, Serialize)]
pub struct ShardedMapStats {
    pub total_entries: usize,
    pub total_reads: u64,
    pub total_writes: u64,
    pub shard_entry_counts: Vec<usize>,
}

// =============================================================================
// Tests
// =============================================================================
