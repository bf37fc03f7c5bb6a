//! Local Region
//!
//! A replicated region, or one bucket of a partitioned region. Stores entries
//! in a [`ShardedMap`] and routes every weight change through its
//! [`RegionEvictionCoordinator`].
//!
//! Writers make room before touching the entry, then apply the mutation under
//! the entry's slot lock. The lock order is slot, then list segment; the
//! eviction scan never holds a segment lock while locking a slot.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::RegionConfig;
use crate::disk::DiskRegionSnapshot;
use crate::error::{Error, Result};
use crate::eviction::{EvictionOutcome, Housekeeping, RegionEvictionCoordinator, StatsSnapshot};

use super::entry::{EntryKey, EntryValue, RegionEntry, Residency};
use super::shard::ShardedMap;
use super::{EvictableRegion, RegionContext};

/// Result of an explicit destroy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DestroyOutcome {
    /// The key held a value (in memory or on disk)
    pub existed: bool,
    /// The destroy count reached a multiple of the destroys limit
    ///
    /// Advisory: callers churning through destroys may want to slow down.
    pub destroys_limit_reached: bool,
}

/// Region storage bound to one eviction coordinator
pub struct LocalRegion {
    name: String,
    bucket_id: Option<u32>,
    entries: ShardedMap<EntryKey, Arc<RegionEntry>>,
    coordinator: RegionEvictionCoordinator,
    destroyed: AtomicBool,
}

impl LocalRegion {
    /// Create a non-partitioned region
    #[instrument(skip_all, fields(region = %config.name))]
    pub fn create(config: &RegionConfig, ctx: &RegionContext) -> Result<Arc<Self>> {
        config.validate()?;
        if config.buckets.is_some() {
            return Err(Error::config(format!(
                "{} is partitioned; create it as a PartitionedRegion",
                config.name
            )));
        }
        let region = Self::build(config.name.clone(), None, config, ctx)?;
        info!(
            "Created region {} ({} / {}, limit {})",
            region.name,
            config.eviction.algorithm,
            config.eviction.action,
            region.coordinator.controller().limit()
        );
        Ok(region)
    }

    /// Create a region or bucket registered under `identity` and bind its
    /// controller to it
    pub(crate) fn build(
        identity: String,
        bucket_id: Option<u32>,
        config: &RegionConfig,
        ctx: &RegionContext,
    ) -> Result<Arc<Self>> {
        let disk = ctx.disk_region(&identity, config)?;
        let coordinator = RegionEvictionCoordinator::new(
            &identity,
            &config.eviction,
            Arc::clone(&ctx.registry),
            ctx.memory.clone(),
            disk,
        )?;

        let region = Arc::new(Self {
            name: identity,
            bucket_id,
            entries: ShardedMap::new(config.storage_shards),
            coordinator,
            destroyed: AtomicBool::new(false),
        });
        let weak = Arc::downgrade(&region);
        let bound: Weak<dyn EvictableRegion> = weak;
        region.coordinator.bind(bound)?;
        Ok(region)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn coordinator(&self) -> &RegionEvictionCoordinator {
        &self.coordinator
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::RegionDestroyed(self.name.clone()));
        }
        Ok(())
    }

    // =========================================================================
    // Entry operations
    // =========================================================================

    /// Store `value` under `key`
    ///
    /// Evicts first if the new weight would not fit. Fails only if the value
    /// cannot be sized or the region is destroyed; running out of evictable
    /// entries shows up as a greedy return in the outcome instead.
    pub fn put(&self, key: impl Into<EntryKey>, value: EntryValue) -> Result<EvictionOutcome> {
        self.ensure_live()?;
        let key = key.into();
        let weight = self.coordinator.entry_size(&key, &value)?;
        let mut pending = Some(value);

        loop {
            let entry = self
                .entries
                .get_or_insert_with(key.clone(), || Arc::new(RegionEntry::vacant(key.clone())));
            let delta = i64::from(weight) - i64::from(entry.weight());
            let outcome = self.coordinator.make_room(self, delta);

            let mut slot = entry.lock();
            let previous = slot.residency;
            if previous == Residency::Gone {
                // Destroyed or evicted since lookup; retry on a fresh entry
                drop(slot);
                self.remove_entry(&entry);
                continue;
            }

            slot.value = pending.take();
            slot.residency = Residency::Memory;
            self.coordinator.charge(&entry, weight);
            match previous {
                Residency::Memory => self.coordinator.touch(&entry),
                Residency::Disk => {
                    self.coordinator.list().insert(Arc::clone(&entry));
                    self.discard_overflow(&key);
                }
                Residency::Vacant | Residency::Gone => {
                    self.coordinator.list().insert(Arc::clone(&entry))
                }
            }
            return Ok(outcome);
        }
    }

    /// Read the value under `key`
    ///
    /// Resident values are touched; overflowed values are served from disk
    /// without being counted again.
    pub fn get(&self, key: impl Into<EntryKey>) -> Result<Option<EntryValue>> {
        self.ensure_live()?;
        let key = key.into();
        let Some(entry) = self.entries.get(&key) else {
            return Ok(None);
        };

        let slot = entry.lock();
        match slot.residency {
            Residency::Memory => {
                let value = slot.value.clone();
                drop(slot);
                self.coordinator.touch(&entry);
                Ok(value)
            }
            Residency::Disk => match self.coordinator.disk() {
                Some(disk) => disk.fetch(&key),
                None => Ok(None),
            },
            Residency::Vacant | Residency::Gone => Ok(None),
        }
    }

    /// Explicitly destroy the entry under `key`
    pub fn destroy(&self, key: impl Into<EntryKey>) -> Result<DestroyOutcome> {
        self.ensure_live()?;
        let key = key.into();
        let Some(entry) = self.entries.remove(&key) else {
            return Ok(DestroyOutcome::default());
        };

        let mut slot = entry.lock();
        let previous = std::mem::replace(&mut slot.residency, Residency::Gone);
        slot.value = None;
        match previous {
            Residency::Memory => {
                self.coordinator.discharge(&entry);
            }
            Residency::Disk => self.discard_overflow(&key),
            Residency::Vacant | Residency::Gone => return Ok(DestroyOutcome::default()),
        }
        drop(slot);

        Ok(DestroyOutcome {
            existed: true,
            destroys_limit_reached: self.coordinator.record_destroy(&entry),
        })
    }

    /// Where the value under `key` currently lives
    pub fn residency(&self, key: impl Into<EntryKey>) -> Option<Residency> {
        self.entries
            .get(&key.into())
            .map(|e| e.residency())
            .filter(|r| matches!(r, Residency::Memory | Residency::Disk))
    }

    /// Returns true if `key` holds a value in memory or on disk
    pub fn contains_key(&self, key: impl Into<EntryKey>) -> bool {
        self.residency(key).is_some()
    }

    fn discard_overflow(&self, key: &EntryKey) {
        let Some(disk) = self.coordinator.disk() else {
            return;
        };
        if let Err(e) = disk.discard(key) {
            warn!("{}: failed to drop disk copy of {}: {}", self.name, key, e);
        }
    }

    // =========================================================================
    // Capacity management
    // =========================================================================

    /// Change the limit (percentage for heap-percentage regions)
    pub fn set_limit(&self, limit: u64) -> Result<()> {
        self.coordinator.controller().set_limit(limit)
    }

    /// Recompute the counter from the stored entries
    #[instrument(skip(self), fields(region = %self.name))]
    pub fn recover_statistics(&self) -> i64 {
        self.coordinator.reset_counter(self)
    }

    /// Entries stored, including overflowed ones
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries currently resident in memory
    pub fn resident_count(&self) -> usize {
        self.coordinator.list().len()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.coordinator.snapshot()
    }

    pub fn disk_snapshot(&self) -> Option<DiskRegionSnapshot> {
        self.coordinator.disk().map(|d| d.snapshot())
    }

    /// Destroy the whole region and unregister its statistics
    #[instrument(skip(self), fields(region = %self.name))]
    pub fn destroy_region(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Err(Error::RegionDestroyed(self.name.clone()));
        }

        let entries = self.entries.drain();
        for entry in &entries {
            let mut slot = entry.lock();
            let previous = std::mem::replace(&mut slot.residency, Residency::Gone);
            slot.value = None;
            match previous {
                Residency::Memory => {
                    self.coordinator.discharge(entry);
                    self.coordinator.list().remove(entry);
                }
                Residency::Disk => self.discard_overflow(entry.key()),
                Residency::Vacant | Residency::Gone => {}
            }
        }
        self.coordinator.list().purge();
        self.coordinator.close();

        info!("Destroyed region {} ({} entries)", self.name, entries.len());
        Ok(())
    }
}

impl EvictableRegion for LocalRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn bucket_id(&self) -> Option<u32> {
        self.bucket_id
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn remove_entry(&self, entry: &Arc<RegionEntry>) -> bool {
        self.entries
            .remove_if(entry.key(), |current| Arc::ptr_eq(current, entry))
            .is_some()
    }

    fn read_entry(&self, key: &EntryKey) -> Option<Arc<RegionEntry>> {
        self.entries.get(key)
    }

    fn live_entries(&self) -> Vec<Arc<RegionEntry>> {
        self.entries.values()
    }
}

impl Housekeeping for LocalRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn housekeep(&self) -> EvictionOutcome {
        self.coordinator.housekeep()
    }
}

impl Drop for LocalRegion {
    fn drop(&mut self) {
        if !self.is_destroyed() {
            self.coordinator.close();
        }
    }
}

impl fmt::Debug for LocalRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalRegion")
            .field("name", &self.name)
            .field("bucket_id", &self.bucket_id)
            .field("entries", &self.entries.len())
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
