//! Eviction Statistics
//!
//! Per-region (or per-bucket) counters updated by every mutating thread.
//!
//! All updates are single atomic operations. The one exception is
//! [`EvictionStatistics::reset_counter`], which replaces the counter with a
//! re-scanned total and must not interleave with in-flight increments; counter
//! updates therefore pass through a shared gate that the reset takes exclusively.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use crossbeam::utils::CachePadded;
use parking_lot::RwLock;
use serde::Serialize;

/// Capacity counters for one region or bucket
#[derive(Debug)]
pub struct EvictionStatistics {
    /// Region identity these statistics describe
    name: String,
    /// Configured limit, in algorithm units
    limit: CachePadded<AtomicU64>,
    /// Accumulated weight of resident entries; may dip below zero transiently
    counter: CachePadded<AtomicI64>,
    /// Capacity-driven removals
    evictions: AtomicU64,
    /// Explicit destroys
    destroys: AtomicU64,
    /// Destroy count at which purge/backpressure is signalled
    destroys_limit: AtomicU64,
    /// Eviction checks performed
    evaluations: AtomicU64,
    /// Eviction passes that gave up before reaching the target
    greedy_returns: AtomicU64,
    /// Shared by counter updates, exclusive for resets
    reset_gate: RwLock<()>,
}

impl EvictionStatistics {
    /// Create zeroed statistics
    pub fn new(name: impl Into<String>, limit: u64, destroys_limit: u64) -> Self {
        Self {
            name: name.into(),
            limit: CachePadded::new(AtomicU64::new(limit)),
            counter: CachePadded::new(AtomicI64::new(0)),
            evictions: AtomicU64::new(0),
            destroys: AtomicU64::new(0),
            destroys_limit: AtomicU64::new(destroys_limit),
            evaluations: AtomicU64::new(0),
            greedy_returns: AtomicU64::new(0),
            reset_gate: RwLock::new(()),
        }
    }

    /// Region identity
    pub fn name(&self) -> &str {
        &self.name
    }

    // Limit
    pub fn limit(&self) -> u64 {
        self.limit.load(Ordering::Acquire)
    }

    pub fn set_limit(&self, limit: u64) {
        self.limit.store(limit, Ordering::Release);
    }

    // Counter
    pub fn counter(&self) -> i64 {
        self.counter.load(Ordering::Acquire)
    }

    /// Add `delta` to the counter and return the new value
    pub fn increment_counter(&self, delta: i64) -> i64 {
        let _gate = self.reset_gate.read();
        self.counter.fetch_add(delta, Ordering::AcqRel) + delta
    }

    /// Subtract `delta` from the counter and return the new value
    pub fn decrement_counter(&self, delta: i64) -> i64 {
        let _gate = self.reset_gate.read();
        self.counter.fetch_sub(delta, Ordering::AcqRel) - delta
    }

    /// Run `update` and add the delta it returns, as one step with respect to resets
    ///
    /// Used when a per-entry weight must change in lockstep with the counter.
    pub fn adjust_counter_with<F>(&self, update: F) -> i64
    where
        F: FnOnce() -> i64,
    {
        let _gate = self.reset_gate.read();
        let delta = update();
        self.counter.fetch_add(delta, Ordering::AcqRel) + delta
    }

    /// Replace the counter if it still holds `expected`
    pub fn compare_and_reset_counter(&self, expected: i64, new: i64) -> bool {
        let _gate = self.reset_gate.read();
        self.counter
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Set the counter to the total produced by `rescan`
    ///
    /// Counter updates from other threads wait while `rescan` runs.
    pub fn reset_counter<F>(&self, rescan: F) -> i64
    where
        F: FnOnce() -> i64,
    {
        let _gate = self.reset_gate.write();
        let total = rescan();
        self.counter.store(total, Ordering::Release);
        total
    }

    /// Returns true if `counter + delta` exceeds the limit
    #[inline]
    pub fn exceeds_limit_with(&self, delta: i64) -> bool {
        let limit = i64::try_from(self.limit()).unwrap_or(i64::MAX);
        self.counter().saturating_add(delta) > limit
    }

    // Evictions
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    // Destroys

    /// Count an explicit destroy; returns true when the running total reaches a
    /// multiple of the destroys limit
    pub fn record_destroy(&self) -> bool {
        let total = self.destroys.fetch_add(1, Ordering::Relaxed) + 1;
        let limit = self.destroys_limit();
        limit > 0 && total % limit == 0
    }

    pub fn destroys(&self) -> u64 {
        self.destroys.load(Ordering::Relaxed)
    }

    pub fn destroys_limit(&self) -> u64 {
        self.destroys_limit.load(Ordering::Relaxed)
    }

    pub fn set_destroys_limit(&self, limit: u64) {
        self.destroys_limit.store(limit, Ordering::Relaxed);
    }

    // Evaluations / greedy returns
    pub fn record_evaluation(&self) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn record_greedy_return(&self) {
        self.greedy_returns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn greedy_returns(&self) -> u64 {
        self.greedy_returns.load(Ordering::Relaxed)
    }

    /// Get snapshot of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            name: self.name.clone(),
            limit: self.limit(),
            counter: self.counter(),
            evictions: self.evictions(),
            destroys: self.destroys(),
            destroys_limit: self.destroys_limit(),
            evaluations: self.evaluations(),
            greedy_returns: self.greedy_returns(),
            taken_at: Utc::now(),
        }
    }
}

/// Point-in-time copy of [`EvictionStatistics`]
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub name: String,
    pub limit: u64,
    pub counter: i64,
    pub evictions: u64,
    pub destroys: u64,
    pub destroys_limit: u64,
    pub evaluations: u64,
    pub greedy_returns: u64,
    pub taken_at: DateTime<Utc>,
}

impl StatsSnapshot {
    /// Zeroed snapshot named `name`
    pub fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            limit: 0,
            counter: 0,
            evictions: 0,
            destroys: 0,
            destroys_limit: 0,
            evaluations: 0,
            greedy_returns: 0,
            taken_at: Utc::now(),
        }
    }

    /// Fold another snapshot into this one (bucket aggregation)
    pub fn merge(&mut self, other: &StatsSnapshot) {
        self.limit = self.limit.saturating_add(other.limit);
        self.counter += other.counter;
        self.evictions += other.evictions;
        self.destroys += other.destroys;
        self.destroys_limit = self.destroys_limit.saturating_add(other.destroys_limit);
        self.evaluations += other.evaluations;
        self.greedy_returns += other.greedy_returns;
        self.taken_at = self.taken_at.max(other.taken_at);
    }

    /// Counter as a fraction of the limit
    pub fn utilization(&self) -> f64 {
        if self.limit == 0 {
            0.0
        } else {
            self.counter.max(0) as f64 / self.limit as f64
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
