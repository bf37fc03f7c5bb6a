//! Disk Region
//!
//! The secondary-storage side of an overflow region. Tracks which part of the
//! region's dataset is still resident in memory and hands evicted values to a
//! [`DiskStore`].

pub mod store;

pub use store::{DiskStore, DiskStoreStats, FileDiskStore, InMemoryDiskStore};

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::region::{EntryKey, EntryValue};

/// What the eviction controller needs to know about a disk-backed region
pub trait DiskRegionView: Send + Sync {
    /// Weight of the values currently held in memory
    fn resident_size(&self) -> u64;

    /// Returns true if evicted values may be written to disk
    fn is_overflow_enabled(&self) -> bool;

    /// Write an evicted value to disk
    fn persist(&self, key: &EntryKey, value: &EntryValue) -> Result<()>;
}

/// Disk companion of one region or bucket
pub struct DiskRegion {
    store: Arc<dyn DiskStore>,
    overflow_enabled: bool,
    /// Weight of in-memory values
    resident: AtomicI64,
    /// Values currently overflowed
    overflowed: AtomicU64,
}

impl DiskRegion {
    /// Create a disk region on top of `store`
    pub fn new(store: Arc<dyn DiskStore>, overflow_enabled: bool) -> Self {
        Self {
            store,
            overflow_enabled,
            resident: AtomicI64::new(0),
            overflowed: AtomicU64::new(0),
        }
    }

    /// Adjust the resident weight by `delta`
    pub fn adjust_resident(&self, delta: i64) {
        self.resident.fetch_add(delta, Ordering::AcqRel);
    }

    /// Replace the resident weight (recovery re-scan)
    pub fn reset_resident(&self, total: i64) {
        self.resident.store(total, Ordering::Release);
    }

    /// Number of values currently on disk
    pub fn overflow_count(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }

    /// Read an overflowed value
    pub fn fetch(&self, key: &EntryKey) -> Result<Option<EntryValue>> {
        self.store.read(key)
    }

    /// Drop the disk copy of a value; returns true if one existed
    pub fn discard(&self, key: &EntryKey) -> Result<bool> {
        let removed = self.store.delete(key)?;
        if removed {
            self.overflowed.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    /// Point-in-time view
    pub fn snapshot(&self) -> DiskRegionSnapshot {
        DiskRegionSnapshot {
            resident_size: self.resident_size(),
            overflow_count: self.overflow_count(),
            store: self.store.stats(),
        }
    }
}

impl DiskRegionView for DiskRegion {
    fn resident_size(&self) -> u64 {
        self.resident.load(Ordering::Acquire).max(0) as u64
    }

    fn is_overflow_enabled(&self) -> bool {
        self.overflow_enabled
    }

    fn persist(&self, key: &EntryKey, value: &EntryValue) -> Result<()> {
        if !self.overflow_enabled {
            return Err(Error::EvictionApplication {
                key: key.to_string(),
                reason: "overflow is not enabled for this region".to_string(),
            });
        }
        self.store
            .write(key, value)
            .map_err(|e| Error::EvictionApplication {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        self.overflowed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl fmt::Debug for DiskRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskRegion")
            .field("overflow_enabled", &self.overflow_enabled)
            .field("resident", &self.resident_size())
            .field("overflowed", &self.overflow_count())
            .finish()
    }
}

/// Serializable disk region state
#[derive(Debug, Clone, Serialize)]
pub struct DiskRegionSnapshot {
    pub resident_size: u64,
    pub overflow_count: u64,
    pub store: DiskStoreStats,
}

impl DiskRegionSnapshot {
    /// Fold a bucket's disk state into this one
    ///
    /// Only meaningful when the buckets write to separate stores.
    pub fn merge(&mut self, other: &DiskRegionSnapshot) {
        self.resident_size += other.resident_size;
        self.overflow_count += other.overflow_count;
        self.store.object_count += other.store.object_count;
        self.store.reads += other.store.reads;
        self.store.writes += other.store.writes;
        self.store.deletes += other.store.deletes;
    }
}

// =============================================================================
// Tests
// =============================================================================
