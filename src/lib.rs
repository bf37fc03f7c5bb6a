//! Region Evict - Capacity Accounting and Eviction for In-Memory Regions
//!
//! Keeps keyed in-memory regions within a configured capacity. A region (or
//! each bucket of a partitioned region) tracks the cumulative weight of its
//! resident entries, and writers evict approximately least-recently-used
//! entries inline once the limit would be exceeded. Evicted entries are either
//! destroyed or overflowed to disk.
//!
//! # Architecture
//!
//! ```text
//! LocalRegion / PartitionedRegion
//!   │
//!   └─▶ RegionEvictionCoordinator ──▶ EvictionController ──▶ EvictionStatistics
//!         │                                                      │
//!         ├─▶ EvictionList (segmented CLOCK)          StatisticsRegistry (Prometheus)
//!         └─▶ DiskRegion ──▶ DiskStore
//! ```
//!
//! # Modules
//!
//! - [`config`] - Region and eviction configuration
//! - [`disk`] - Overflow targets
//! - [`error`] - Error types
//! - [`eviction`] - Algorithms, sizing, statistics, controller, list and housekeeping
//! - [`region`] - Entry storage bound to a capacity policy

pub mod config;
pub mod disk;
pub mod error;
pub mod eviction;
pub mod region;

// Re-export commonly used types
pub use config::{EvictionConfig, RegionConfig};
pub use disk::{DiskRegion, DiskStore, FileDiskStore, InMemoryDiskStore};
pub use error::{Error, Result};
pub use eviction::{
    EvictionAction, EvictionAlgorithm, EvictionController, EvictionOutcome, EvictionStatistics,
    Housekeeper, Housekeeping, RegionEvictionCoordinator, StatisticsRegistry, StatsSnapshot,
};
pub use region::{
    DestroyOutcome, EntryKey, EntryValue, LocalRegion, PartitionedRegion, RegionContext,
    Residency,
};
