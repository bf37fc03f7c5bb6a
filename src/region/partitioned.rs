//! Partitioned Region
//!
//! Keys are routed to a fixed set of buckets. Each bucket is a [`LocalRegion`]
//! with its own controller, statistics and eviction list, so limits are
//! enforced per bucket and never negotiated across buckets.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::RegionConfig;
use crate::error::{Error, Result};
use crate::eviction::{EvictionOutcome, Housekeeping, StatsSnapshot};

use super::entry::{EntryKey, EntryValue, Residency};
use super::local::{DestroyOutcome, LocalRegion};
use super::RegionContext;

/// Region split into independently bounded buckets
pub struct PartitionedRegion {
    name: String,
    buckets: Vec<Arc<LocalRegion>>,
    destroyed: AtomicBool,
}

impl PartitionedRegion {
    /// Create the region and all of its buckets
    ///
    /// Bucket statistics register as `<name>/bucket-<id>`.
    #[instrument(skip_all, fields(region = %config.name))]
    pub fn create(config: &RegionConfig, ctx: &RegionContext) -> Result<Arc<Self>> {
        config.validate()?;
        let count = config.buckets.ok_or_else(|| {
            Error::config(format!("{} has no bucket count", config.name))
        })?;

        let mut buckets = Vec::with_capacity(count as usize);
        for id in 0..count {
            let identity = Self::bucket_identity(&config.name, id);
            // Buckets built so far unregister on drop if this fails
            buckets.push(LocalRegion::build(identity, Some(id), config, ctx)?);
        }

        info!(
            "Created partitioned region {} with {} buckets ({} / {}, limit {} per bucket)",
            config.name,
            count,
            config.eviction.algorithm,
            config.eviction.action,
            buckets
                .first()
                .map(|b| b.coordinator().controller().limit())
                .unwrap_or_default()
        );

        Ok(Arc::new(Self {
            name: config.name.clone(),
            buckets,
            destroyed: AtomicBool::new(false),
        }))
    }

    /// Statistics identity of a bucket
    pub fn bucket_identity(region: &str, bucket_id: u32) -> String {
        format!("{region}/bucket-{bucket_id}")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Bucket owning `key`
    pub fn bucket_for(&self, key: &EntryKey) -> &Arc<LocalRegion> {
        &self.buckets[key.slot(self.buckets.len())]
    }

    /// Bucket by id
    pub fn bucket(&self, id: u32) -> Option<&Arc<LocalRegion>> {
        self.buckets.get(id as usize)
    }

    pub fn buckets(&self) -> &[Arc<LocalRegion>] {
        &self.buckets
    }

    fn ensure_live(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(Error::RegionDestroyed(self.name.clone()));
        }
        Ok(())
    }

    pub fn put(&self, key: impl Into<EntryKey>, value: EntryValue) -> Result<EvictionOutcome> {
        self.ensure_live()?;
        let key = key.into();
        self.bucket_for(&key).put(key, value)
    }

    pub fn get(&self, key: impl Into<EntryKey>) -> Result<Option<EntryValue>> {
        self.ensure_live()?;
        let key = key.into();
        self.bucket_for(&key).get(key)
    }

    pub fn destroy(&self, key: impl Into<EntryKey>) -> Result<DestroyOutcome> {
        self.ensure_live()?;
        let key = key.into();
        self.bucket_for(&key).destroy(key)
    }

    pub fn residency(&self, key: impl Into<EntryKey>) -> Option<Residency> {
        let key = key.into();
        self.bucket_for(&key).residency(key)
    }

    /// Apply a new limit to every bucket
    pub fn set_limit(&self, limit: u64) -> Result<()> {
        self.buckets.iter().try_for_each(|b| b.set_limit(limit))
    }

    /// Recompute every bucket's counter; returns the total
    #[instrument(skip(self), fields(region = %self.name))]
    pub fn recover_statistics(&self) -> i64 {
        self.buckets.iter().map(|b| b.recover_statistics()).sum()
    }

    /// Entries stored across buckets
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.is_empty())
    }

    /// Sum of all bucket statistics, named after the region
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut snapshots = self.buckets.iter().map(|b| b.snapshot());
        let mut total = match snapshots.next() {
            Some(first) => first,
            None => return StatsSnapshot::empty(&self.name),
        };
        for snapshot in snapshots {
            total.merge(&snapshot);
        }
        total.name = self.name.clone();
        total
    }

    pub fn bucket_snapshots(&self) -> Vec<StatsSnapshot> {
        self.buckets.iter().map(|b| b.snapshot()).collect()
    }

    /// Destroy every bucket
    #[instrument(skip(self), fields(region = %self.name))]
    pub fn destroy_region(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Err(Error::RegionDestroyed(self.name.clone()));
        }
        for bucket in &self.buckets {
            bucket.destroy_region()?;
        }
        info!("Destroyed partitioned region {}", self.name);
        Ok(())
    }
}

impl Housekeeping for PartitionedRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn housekeep(&self) -> EvictionOutcome {
        let mut total = EvictionOutcome::default();
        for bucket in &self.buckets {
            total.merge(&bucket.housekeep());
        }
        total
    }
}

impl fmt::Debug for PartitionedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionedRegion")
            .field("name", &self.name)
            .field("buckets", &self.buckets.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
