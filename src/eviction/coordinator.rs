//! Region Eviction Coordinator
//!
//! Ties a controller and an eviction list to one region or bucket. Every counter
//! change of the region goes through here:
//!
//! - [`charge`](RegionEvictionCoordinator::charge) / [`discharge`](RegionEvictionCoordinator::discharge)
//!   move an entry's weight in and out of the counter
//! - [`make_room`](RegionEvictionCoordinator::make_room) runs before a mutation
//!   adds weight and evicts until the delta fits or the greedy budget runs out
//! - [`record_destroy`](RegionEvictionCoordinator::record_destroy) accounts for
//!   explicit destroys and compacts the list every `destroys_limit` destroys
//!
//! Eviction runs inline on the mutating thread. Overshoot is tolerated: a pass
//! that cannot reach the target records a greedy return and lets the write go on.

use std::fmt;
use std::sync::{Arc, Weak};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::EvictionConfig;
use crate::disk::{DiskRegion, DiskRegionView};
use crate::error::{Error, Result};
use crate::region::{EntryKey, EntryValue, EvictableRegion, RegionEntry, Residency};

use super::algorithm::EvictionAction;
use super::controller::EvictionController;
use super::heap::MemoryObserver;
use super::list::EvictionList;
use super::registry::StatisticsRegistry;
use super::statistics::{EvictionStatistics, StatsSnapshot};

/// Result of one eviction check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvictionOutcome {
    /// The limit would have been exceeded
    pub required: bool,
    /// Candidates requested from the list
    pub attempts: u32,
    /// Entries destroyed or overflowed
    pub evicted: u32,
    /// Candidates already destroyed or overflowed by someone else
    pub stale: u32,
    /// Candidates whose action failed
    pub failures: u32,
    /// The pass ended with the limit still exceeded
    pub greedy_return: bool,
}

impl EvictionOutcome {
    /// Fold another outcome into this one
    pub fn merge(&mut self, other: &EvictionOutcome) {
        self.required |= other.required;
        self.attempts += other.attempts;
        self.evicted += other.evicted;
        self.stale += other.stale;
        self.failures += other.failures;
        self.greedy_return |= other.greedy_return;
    }
}

/// Eviction driver for one region or bucket
pub struct RegionEvictionCoordinator {
    controller: EvictionController,
    list: EvictionList<RegionEntry>,
    disk: Option<Arc<DiskRegion>>,
    registry: Arc<StatisticsRegistry>,
    max_greedy_attempts: u32,
}

impl RegionEvictionCoordinator {
    /// Register statistics under `identity` and build the controller and list
    pub fn new(
        identity: &str,
        config: &EvictionConfig,
        registry: Arc<StatisticsRegistry>,
        memory: Option<Arc<dyn MemoryObserver>>,
        disk: Option<Arc<DiskRegion>>,
    ) -> Result<Self> {
        config.validate()?;
        if config.action.is_overflow()
            && !disk.as_ref().is_some_and(|d| d.is_overflow_enabled())
        {
            return Err(Error::config(format!(
                "{identity}: overflow-to-disk requires an overflow-enabled disk region"
            )));
        }

        let limit = EvictionController::initial_limit(config, memory.as_deref())?;
        let stats = registry.init_stats(identity, config.algorithm.statistics_type(), || {
            EvictionStatistics::new(identity, limit, config.destroys_limit)
        })?;

        let controller = match EvictionController::new(config, stats, memory) {
            Ok(controller) => controller,
            Err(e) => {
                registry.unregister(identity);
                return Err(e);
            }
        };

        debug!(
            "{}: eviction {} / {} with limit {}",
            identity, config.algorithm, config.action, limit
        );

        Ok(Self {
            controller,
            list: EvictionList::new(config.list_segments),
            disk,
            registry,
            max_greedy_attempts: config.max_greedy_attempts,
        })
    }

    pub fn controller(&self) -> &EvictionController {
        &self.controller
    }

    pub fn statistics(&self) -> &Arc<EvictionStatistics> {
        self.controller.statistics()
    }

    pub fn list(&self) -> &EvictionList<RegionEntry> {
        &self.list
    }

    /// Disk companion, for overflow regions
    pub fn disk(&self) -> Option<&Arc<DiskRegion>> {
        self.disk.as_ref()
    }

    /// Greedy-attempt budget per pass
    pub fn max_greedy_attempts(&self) -> u32 {
        self.max_greedy_attempts
    }

    /// Bind to the owning region or bucket
    pub fn bind(&self, region: Weak<dyn EvictableRegion>) -> Result<()> {
        self.controller.set_bucket_region(region)
    }

    /// Weight of a key/value pair under this region's algorithm
    pub fn entry_size(&self, key: &EntryKey, value: &EntryValue) -> Result<u32> {
        self.controller.entry_size(key, value)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.statistics().snapshot()
    }

    // =========================================================================
    // Counter accounting
    // =========================================================================

    /// Charge `weight` for a resident entry, replacing whatever it was charged
    /// before; returns the previous charge
    ///
    /// Must be called under the entry's slot lock.
    pub fn charge(&self, entry: &RegionEntry, weight: u32) -> u32 {
        let mut previous = 0;
        self.statistics().adjust_counter_with(|| {
            previous = entry.swap_weight(weight);
            let delta = i64::from(weight) - i64::from(previous);
            if let Some(disk) = &self.disk {
                disk.adjust_resident(delta);
            }
            delta
        });
        previous
    }

    /// Stop charging a resident entry; returns the weight released
    ///
    /// Must be called under the entry's slot lock.
    pub fn discharge(&self, entry: &RegionEntry) -> u32 {
        self.charge(entry, 0)
    }

    /// Record a read or update of a resident entry
    #[inline]
    pub fn touch(&self, entry: &RegionEntry) {
        self.list.touch(entry);
    }

    // =========================================================================
    // Eviction
    // =========================================================================

    /// Make room for a mutation adding `delta` weight to `region`
    pub fn make_room(&self, region: &dyn EvictableRegion, delta: i64) -> EvictionOutcome {
        let stats = self.statistics();
        stats.record_evaluation();
        if !self.controller.must_evict(stats, region, delta) {
            return EvictionOutcome::default();
        }
        self.evict_until(region, delta)
    }

    /// Background pass: evict while the resident set is over the limit
    ///
    /// Also refreshes heap-percentage limits. Needs a bound region.
    pub fn housekeep(&self) -> EvictionOutcome {
        self.controller.refresh_heap_limit();

        let Some(region) = self.controller.bucket_region() else {
            return EvictionOutcome::default();
        };
        if region.is_destroyed() {
            return EvictionOutcome::default();
        }

        let stats = self.statistics();
        let disk = self.disk.as_deref().map(|d| d as &dyn DiskRegionView);
        if !self.controller.lru_limit_exceeded(stats, disk) {
            return EvictionOutcome::default();
        }
        stats.record_evaluation();
        self.evict_until(region.as_ref(), 0)
    }

    fn evict_until(&self, region: &dyn EvictableRegion, delta: i64) -> EvictionOutcome {
        let stats = self.statistics();
        let mut outcome = EvictionOutcome {
            required: true,
            ..EvictionOutcome::default()
        };

        while outcome.attempts < self.max_greedy_attempts {
            if !self.controller.must_evict(stats, region, delta) {
                break;
            }
            outcome.attempts += 1;

            let Some(candidate) = self.list.evict_candidate() else {
                outcome.greedy_return = true;
                break;
            };

            match self.apply_action(region, &candidate) {
                Ok(true) => outcome.evicted += 1,
                Ok(false) => outcome.stale += 1,
                Err(e) => {
                    outcome.failures += 1;
                    if e.is_recoverable() {
                        warn!("{}: {}", region.name(), e);
                    } else {
                        error!("{}: unexpected eviction failure: {}", region.name(), e);
                    }
                }
            }
        }

        if self.controller.must_evict(stats, region, delta) {
            outcome.greedy_return = true;
        }
        if outcome.greedy_return {
            stats.record_greedy_return();
            warn!(
                "{}: greedy return after {} attempts (counter {}, limit {}, delta {})",
                region.name(),
                outcome.attempts,
                stats.counter(),
                stats.limit(),
                delta
            );
        }

        debug!(
            "{}: eviction pass evicted {} ({} stale, {} failed)",
            region.name(),
            outcome.evicted,
            outcome.stale,
            outcome.failures
        );
        outcome
    }

    /// Apply the configured action to a claimed candidate
    ///
    /// Returns `Ok(false)` if the entry had already left memory.
    fn apply_action(&self, region: &dyn EvictableRegion, entry: &Arc<RegionEntry>) -> Result<bool> {
        let mut slot = entry.lock();
        if slot.residency != Residency::Memory {
            return Ok(false);
        }

        match self.controller.action() {
            EvictionAction::LocalDestroy => {
                slot.residency = Residency::Gone;
                slot.value = None;
                self.discharge(entry);
                drop(slot);

                region.remove_entry(entry);
                self.statistics().record_eviction();
                Ok(true)
            }
            EvictionAction::OverflowToDisk => {
                let Some(disk) = self.disk.as_ref() else {
                    self.list.requeue(Arc::clone(entry));
                    return Err(Error::EvictionApplication {
                        key: entry.key().to_string(),
                        reason: "no disk region to overflow to".to_string(),
                    });
                };
                let Some(value) = slot.value.take() else {
                    return Err(Error::Internal(format!(
                        "resident entry {} has no value",
                        entry.key()
                    )));
                };

                // Release the weight before the write so concurrent writers see the room
                let weight = self.discharge(entry);
                match disk.persist(entry.key(), &value) {
                    Ok(()) => {
                        slot.residency = Residency::Disk;
                        self.statistics().record_eviction();
                        Ok(true)
                    }
                    Err(e) => {
                        slot.value = Some(value);
                        self.charge(entry, weight);
                        self.list.requeue(Arc::clone(entry));
                        Err(e)
                    }
                }
            }
            EvictionAction::None => {
                self.list.requeue(Arc::clone(entry));
                Ok(false)
            }
        }
    }

    // =========================================================================
    // Destroy / reset / teardown
    // =========================================================================

    /// Account for an explicit destroy of `entry`
    ///
    /// The caller has already moved the entry to `Gone` and discharged it.
    /// Returns true when the destroy count reached a multiple of the destroys
    /// limit; retired links are purged from the list at that point.
    pub fn record_destroy(&self, entry: &RegionEntry) -> bool {
        self.list.remove(entry);
        let crossed = self.statistics().record_destroy();
        if crossed {
            let purged = self.list.purge();
            debug!(
                "{}: destroys limit reached, purged {} retired links",
                self.statistics().name(),
                purged
            );
        }
        crossed
    }

    /// Recompute the counter from a full scan of `region`
    pub fn reset_counter(&self, region: &dyn EvictableRegion) -> i64 {
        let entries = region.live_entries();
        let total = self.statistics().reset_counter(|| {
            entries.iter().map(|e| i64::from(e.weight())).sum()
        });
        if let Some(disk) = &self.disk {
            disk.reset_resident(total);
        }
        info!(
            "{}: counter reset to {} from {} entries",
            region.name(),
            total,
            entries.len()
        );
        total
    }

    /// Unregister this coordinator's statistics
    pub fn close(&self) -> bool {
        self.registry.unregister(self.statistics().name())
    }
}

impl fmt::Debug for RegionEvictionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionEvictionCoordinator")
            .field("controller", &self.controller)
            .field("list", &self.list)
            .field("disk", &self.disk)
            .field("max_greedy_attempts", &self.max_greedy_attempts)
            .finish()
    }
}
