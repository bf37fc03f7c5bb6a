//! Eviction Controller
//!
//! Owns one region's (or bucket's) algorithm, action, sizer and statistics, and
//! answers the two capacity questions: must a mutation evict first, and has the
//! resident set outgrown the limit.
//!
//! The limit lives only in the statistics, so changing it is a single atomic
//! store that every subsequent check observes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use tracing::{debug, info};

use crate::config::{validate_percentage, EvictionConfig};
use crate::disk::DiskRegionView;
use crate::error::{Error, Result};
use crate::region::{EntryKey, EntryValue, EvictableRegion};

use super::algorithm::{validate_combination, EvictionAction, EvictionAlgorithm};
use super::heap::{heap_limit, MemoryObserver};
use super::registry::StatId;
use super::sizer::{sizer_for, SizeEstimator};
use super::statistics::EvictionStatistics;

/// Capacity policy of one region or bucket
pub struct EvictionController {
    algorithm: EvictionAlgorithm,
    action: EvictionAction,
    sizer: Box<dyn SizeEstimator>,
    stats: Arc<EvictionStatistics>,
    /// Heap percentage as f64 bits (heap-percentage only)
    heap_percentage: AtomicU64,
    memory: Option<Arc<dyn MemoryObserver>>,
    bucket: OnceCell<Weak<dyn EvictableRegion>>,
}

impl EvictionController {
    /// Create a controller over already-registered statistics
    pub fn new(
        config: &EvictionConfig,
        stats: Arc<EvictionStatistics>,
        memory: Option<Arc<dyn MemoryObserver>>,
    ) -> Result<Self> {
        config.validate()?;
        if config.algorithm == EvictionAlgorithm::HeapPercentage && memory.is_none() {
            return Err(Error::config(
                "heap-percentage eviction requires a memory observer",
            ));
        }

        Ok(Self {
            algorithm: config.algorithm,
            action: config.action,
            sizer: sizer_for(
                config.algorithm,
                config.entry_overhead,
                config.max_sizing_depth,
            ),
            stats,
            heap_percentage: AtomicU64::new(config.heap_percentage.to_bits()),
            memory,
            bucket: OnceCell::new(),
        })
    }

    /// Limit a new region or bucket starts with
    pub fn initial_limit(
        config: &EvictionConfig,
        memory: Option<&dyn MemoryObserver>,
    ) -> Result<u64> {
        validate_combination(config.algorithm, config.action)?;
        match config.algorithm {
            EvictionAlgorithm::HeapPercentage => {
                validate_percentage(config.heap_percentage)?;
                let memory = memory.ok_or_else(|| {
                    Error::config("heap-percentage eviction requires a memory observer")
                })?;
                Ok(heap_limit(config.heap_percentage, memory.total_memory()))
            }
            _ => Ok(config.limit),
        }
    }

    pub fn algorithm(&self) -> EvictionAlgorithm {
        self.algorithm
    }

    pub fn action(&self) -> EvictionAction {
        self.action
    }

    /// The statistics this controller updates
    pub fn statistics(&self) -> &Arc<EvictionStatistics> {
        &self.stats
    }

    /// Current limit
    pub fn limit(&self) -> u64 {
        self.stats.limit()
    }

    /// Weight of a key/value pair
    pub fn entry_size(&self, key: &EntryKey, value: &EntryValue) -> Result<u32> {
        self.sizer.entry_size(key, value)
    }

    /// Returns true if adding `delta` to `stats` would exceed its limit
    pub fn must_evict(
        &self,
        stats: &EvictionStatistics,
        region: &dyn EvictableRegion,
        delta: i64,
    ) -> bool {
        if !self.algorithm.is_enabled() || region.is_destroyed() {
            return false;
        }
        stats.exceeds_limit_with(delta)
    }

    /// Returns true if the in-memory part of the region is over the limit
    ///
    /// With an overflow-enabled disk region the resident size is compared,
    /// otherwise the counter.
    pub fn lru_limit_exceeded(
        &self,
        stats: &EvictionStatistics,
        disk: Option<&dyn DiskRegionView>,
    ) -> bool {
        if !self.algorithm.is_enabled() {
            return false;
        }
        match disk {
            Some(disk) if disk.is_overflow_enabled() => disk.resident_size() > stats.limit(),
            _ => stats.exceeds_limit_with(0),
        }
    }

    /// Change the limit
    ///
    /// For heap-percentage regions `new_limit` is the new percentage (1..=100)
    /// and the byte limit is recomputed from the memory observer.
    pub fn set_limit(&self, new_limit: u64) -> Result<()> {
        if new_limit == 0 {
            return Err(Error::config("limit must be > 0"));
        }
        if !self.algorithm.is_enabled() {
            return Err(Error::config("cannot set a limit without an eviction algorithm"));
        }

        if self.algorithm == EvictionAlgorithm::HeapPercentage {
            let percentage = new_limit as f64;
            validate_percentage(percentage)?;
            self.heap_percentage
                .store(percentage.to_bits(), Ordering::Relaxed);
            if let Some(limit) = self.refresh_heap_limit() {
                info!(
                    "{}: heap percentage set to {}% ({} bytes)",
                    self.stats.name(),
                    new_limit,
                    limit
                );
            }
            return Ok(());
        }

        let old = self.stats.limit();
        self.stats.set_limit(new_limit);
        if old != new_limit {
            info!("{}: limit changed {} -> {}", self.stats.name(), old, new_limit);
        }
        Ok(())
    }

    /// Configured heap percentage (heap-percentage regions)
    pub fn heap_percentage(&self) -> f64 {
        f64::from_bits(self.heap_percentage.load(Ordering::Relaxed))
    }

    /// Recompute a heap-percentage limit from current host memory
    ///
    /// Returns the new limit, or `None` for other algorithms.
    pub fn refresh_heap_limit(&self) -> Option<u64> {
        if self.algorithm != EvictionAlgorithm::HeapPercentage {
            return None;
        }
        let memory = self.memory.as_ref()?;
        let limit = heap_limit(self.heap_percentage(), memory.total_memory()).max(1);
        if self.stats.limit() != limit {
            debug!("{}: heap limit refreshed to {}", self.stats.name(), limit);
            self.stats.set_limit(limit);
        }
        Some(limit)
    }

    /// Bind this controller to its owning region or bucket
    ///
    /// Only legal once, while the bucket is being created.
    pub fn set_bucket_region(&self, region: Weak<dyn EvictableRegion>) -> Result<()> {
        self.bucket.set(region).map_err(|_| {
            Error::config(format!(
                "{} is already bound to a bucket region",
                self.stats.name()
            ))
        })
    }

    /// The bound region, if bound and still alive
    pub fn bucket_region(&self) -> Option<Arc<dyn EvictableRegion>> {
        self.bucket.get().and_then(Weak::upgrade)
    }

    /// Statistics type registered for this algorithm
    pub fn statistics_type(&self) -> &'static str {
        self.algorithm.statistics_type()
    }

    /// Identity the statistics are registered under
    pub fn statistics_name(&self) -> &str {
        self.stats.name()
    }

    pub fn limit_stat_id(&self) -> u32 {
        StatId::Limit.id()
    }

    pub fn counter_stat_id(&self) -> u32 {
        StatId::Counter.id()
    }

    pub fn evictions_stat_id(&self) -> u32 {
        StatId::Evictions.id()
    }

    pub fn destroys_stat_id(&self) -> u32 {
        StatId::Destroys.id()
    }

    pub fn destroys_limit_stat_id(&self) -> u32 {
        StatId::DestroysLimit.id()
    }

    pub fn evaluations_stat_id(&self) -> u32 {
        StatId::Evaluations.id()
    }

    pub fn greedy_returns_stat_id(&self) -> u32 {
        StatId::GreedyReturns.id()
    }
}

impl fmt::Debug for EvictionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvictionController")
            .field("algorithm", &self.algorithm)
            .field("action", &self.action)
            .field("limit", &self.limit())
            .field("statistics", &self.stats.name())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
