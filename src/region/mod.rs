//! Regions
//!
//! Keyed entry storage subject to one capacity policy. A [`LocalRegion`] is a
//! replicated region or a single bucket; a [`PartitionedRegion`] routes keys to
//! buckets, each enforcing its own limit.

pub mod entry;
pub mod local;
pub mod partitioned;
pub mod shard;

pub use entry::{EntryKey, EntrySlot, EntryValue, RegionEntry, Residency};
pub use local::{DestroyOutcome, LocalRegion};
pub use partitioned::PartitionedRegion;
pub use shard::{ShardedMap, ShardedMapStats};

use std::fmt;
use std::sync::Arc;

use crate::config::RegionConfig;
use crate::disk::{DiskRegion, DiskStore, FileDiskStore};
use crate::error::{Error, Result};
use crate::eviction::{MemoryObserver, StatisticsRegistry};

/// What the eviction machinery needs from a region or bucket
pub trait EvictableRegion: Send + Sync {
    /// Region (or bucket) identity
    fn name(&self) -> &str;

    /// Bucket number within a partitioned region
    fn bucket_id(&self) -> Option<u32>;

    /// Returns true once the region has been destroyed
    fn is_destroyed(&self) -> bool;

    /// Drop `entry` from storage if it is still the entry stored under its key
    fn remove_entry(&self, entry: &Arc<RegionEntry>) -> bool;

    /// Look up the entry stored under `key`
    fn read_entry(&self, key: &EntryKey) -> Option<Arc<RegionEntry>>;

    /// Every entry currently stored
    fn live_entries(&self) -> Vec<Arc<RegionEntry>>;
}

/// Shared collaborators handed to every region at creation
#[derive(Clone)]
pub struct RegionContext {
    /// Where statistics are registered
    pub registry: Arc<StatisticsRegistry>,
    /// Host memory source for heap-percentage limits
    pub memory: Option<Arc<dyn MemoryObserver>>,
    /// Disk store for overflow; falls back to the configured overflow directory
    pub disk_store: Option<Arc<dyn DiskStore>>,
}

impl RegionContext {
    pub fn new(registry: Arc<StatisticsRegistry>) -> Self {
        Self {
            registry,
            memory: None,
            disk_store: None,
        }
    }

    pub fn with_memory_observer(mut self, memory: Arc<dyn MemoryObserver>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_disk_store(mut self, store: Arc<dyn DiskStore>) -> Self {
        self.disk_store = Some(store);
        self
    }

    /// Disk region for `identity`, if the configured action overflows
    pub(crate) fn disk_region(
        &self,
        identity: &str,
        config: &RegionConfig,
    ) -> Result<Option<Arc<DiskRegion>>> {
        if !config.eviction.action.is_overflow() {
            return Ok(None);
        }

        let store: Arc<dyn DiskStore> = match (&self.disk_store, &config.overflow_dir) {
            (Some(store), _) => Arc::clone(store),
            (None, Some(dir)) => Arc::new(FileDiskStore::open(dir.join(identity))?),
            (None, None) => {
                return Err(Error::config(format!(
                    "{identity}: overflow-to-disk needs a disk store or overflow_dir"
                )))
            }
        };
        Ok(Some(Arc::new(DiskRegion::new(store, true))))
    }
}

impl fmt::Debug for RegionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionContext")
            .field("registry", &self.registry)
            .field("memory", &self.memory)
            .field("disk_store", &self.disk_store.is_some())
            .finish()
    }
}
