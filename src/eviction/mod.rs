//! Capacity Accounting and Eviction
//!
//! Keeps every region (or bucket) within its configured capacity bound.
//!
//! # Architecture
//!
//! ```text
//! put(key, value)
//!   │
//!   ├─▶ SizeEstimator ──▶ weight
//!   │
//!   ├─▶ RegionEvictionCoordinator::make_room(delta)
//!   │     ├─ EvictionController::must_evict(counter + delta > limit?)
//!   │     └─ loop ≤ max_greedy_attempts:
//!   │          EvictionList::evict_candidate() ──▶ LOCAL_DESTROY | OVERFLOW_TO_DISK
//!   │
//!   └─▶ apply mutation, charge weight to EvictionStatistics
//! ```
//!
//! # Components
//!
//! - [`EvictionAlgorithm`] / [`EvictionAction`]: what the limit measures and
//!   what happens to evicted entries
//! - [`SizeEstimator`]: entry weight per algorithm
//! - [`EvictionStatistics`]: lock-free counters, one instance per region or bucket
//! - [`StatisticsRegistry`]: init/teardown of statistics and Prometheus export
//! - [`EvictionController`]: limit checks and limit changes
//! - [`EvictionList`]: segmented CLOCK approximation of LRU order
//! - [`RegionEvictionCoordinator`]: the inline eviction loop
//! - [`Housekeeper`]: background passes for regions left over their limit

pub mod algorithm;
pub mod controller;
pub mod coordinator;
pub mod heap;
pub mod housekeeper;
pub mod list;
pub mod registry;
pub mod sizer;
pub mod statistics;

#[cfg(test)]
mod proptest;

pub use algorithm::{validate_combination, EvictionAction, EvictionAlgorithm};
pub use controller::EvictionController;
pub use coordinator::{EvictionOutcome, RegionEvictionCoordinator};
pub use heap::{heap_limit, FixedMemoryObserver, MemoryObserver, SystemMemoryObserver};
pub use housekeeper::{Housekeeper, Housekeeping};
pub use list::{EvictionList, LinkState, LruEntry, LruLink};
pub use registry::{StatId, StatisticsRegistry};
pub use sizer::{
    sizer_for, EntryCountSizer, MemorySizer, SizeEstimator, DEFAULT_ENTRY_OVERHEAD,
    DEFAULT_MAX_SIZING_DEPTH, DEPTH_CAP_ESTIMATE,
};
pub use statistics::{EvictionStatistics, StatsSnapshot};
