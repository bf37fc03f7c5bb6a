//! Eviction algorithm and action selectors
//!
//! Two independent tags composed into a controller: the algorithm decides how an
//! entry is weighed and what the limit means, the action decides what happens to
//! an entry chosen for eviction.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How entries are weighed against the limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionAlgorithm {
    /// No capacity bound
    #[default]
    None,
    /// Every entry weighs 1; the limit is an entry count
    EntryCount,
    /// Entries weigh their estimated footprint; the limit is a share of host memory
    HeapPercentage,
    /// Entries weigh their estimated footprint; the limit is a byte count
    MemorySize,
}

impl EvictionAlgorithm {
    /// Returns true if this algorithm bounds the region at all
    pub fn is_enabled(&self) -> bool {
        !matches!(self, EvictionAlgorithm::None)
    }

    /// Returns true if entries are weighed by their memory footprint
    pub fn is_memory_based(&self) -> bool {
        matches!(
            self,
            EvictionAlgorithm::MemorySize | EvictionAlgorithm::HeapPercentage
        )
    }

    /// Name of the statistics type registered for this algorithm
    pub fn statistics_type(&self) -> &'static str {
        match self {
            EvictionAlgorithm::None => "NoLRUStatistics",
            EvictionAlgorithm::EntryCount => "CountLRUStatistics",
            EvictionAlgorithm::HeapPercentage => "HeapLRUStatistics",
            EvictionAlgorithm::MemorySize => "MemLRUStatistics",
        }
    }

    /// Display names of the limit and counter statistics for this algorithm
    pub fn limit_counter_names(&self) -> (&'static str, &'static str) {
        match self {
            EvictionAlgorithm::EntryCount | EvictionAlgorithm::None => {
                ("entriesAllowed", "entryCount")
            }
            EvictionAlgorithm::MemorySize => ("bytesAllowed", "byteCount"),
            EvictionAlgorithm::HeapPercentage => ("bytesAllowed", "entryBytes"),
        }
    }
}

impl fmt::Display for EvictionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionAlgorithm::None => write!(f, "none"),
            EvictionAlgorithm::EntryCount => write!(f, "entry-count"),
            EvictionAlgorithm::HeapPercentage => write!(f, "heap-percentage"),
            EvictionAlgorithm::MemorySize => write!(f, "memory-size"),
        }
    }
}

impl FromStr for EvictionAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "none" => Ok(EvictionAlgorithm::None),
            "entry-count" | "lru-entry" => Ok(EvictionAlgorithm::EntryCount),
            "heap-percentage" | "lru-heap" => Ok(EvictionAlgorithm::HeapPercentage),
            "memory-size" | "lru-memory" => Ok(EvictionAlgorithm::MemorySize),
            other => Err(Error::config(format!("Unknown eviction algorithm: {other}"))),
        }
    }
}

/// What happens to an entry chosen for eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionAction {
    /// Nothing is evicted
    #[default]
    None,
    /// Remove the entry from this member's storage
    LocalDestroy,
    /// Move the value to the disk store, keeping the key addressable
    OverflowToDisk,
}

impl EvictionAction {
    /// Returns true if evicted values are written to disk
    pub fn is_overflow(&self) -> bool {
        matches!(self, EvictionAction::OverflowToDisk)
    }

    /// Returns true if evicted entries are removed from the region
    pub fn is_local_destroy(&self) -> bool {
        matches!(self, EvictionAction::LocalDestroy)
    }
}

impl fmt::Display for EvictionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionAction::None => write!(f, "none"),
            EvictionAction::LocalDestroy => write!(f, "local-destroy"),
            EvictionAction::OverflowToDisk => write!(f, "overflow-to-disk"),
        }
    }
}

impl FromStr for EvictionAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "none" => Ok(EvictionAction::None),
            "local-destroy" | "destroy" => Ok(EvictionAction::LocalDestroy),
            "overflow-to-disk" | "overflow" => Ok(EvictionAction::OverflowToDisk),
            other => Err(Error::config(format!("Unknown eviction action: {other}"))),
        }
    }
}

/// Reject algorithm/action pairs that cannot work together
pub fn validate_combination(algorithm: EvictionAlgorithm, action: EvictionAction) -> Result<()> {
    match (algorithm.is_enabled(), action) {
        (false, EvictionAction::None) => Ok(()),
        (false, action) => Err(Error::config(format!(
            "Eviction action {action} requires an eviction algorithm"
        ))),
        (true, EvictionAction::None) => Err(Error::config(format!(
            "Eviction algorithm {algorithm} requires an eviction action"
        ))),
        (true, _) => Ok(()),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_algorithm() {
        assert_eq!(
            "entry-count".parse::<EvictionAlgorithm>().unwrap(),
            EvictionAlgorithm::EntryCount
        );
        assert_eq!(
            "MEMORY_SIZE".parse::<EvictionAlgorithm>().unwrap(),
            EvictionAlgorithm::MemorySize
        );
        assert_eq!(
            "lru-heap".parse::<EvictionAlgorithm>().unwrap(),
            EvictionAlgorithm::HeapPercentage
        );
        assert_matches!("lfu".parse::<EvictionAlgorithm>(), Err(Error::Config(_)));
    }

    #[test]
    fn test_parse_action() {
        assert_eq!(
            "overflow".parse::<EvictionAction>().unwrap(),
            EvictionAction::OverflowToDisk
        );
        assert_eq!(
            "local_destroy".parse::<EvictionAction>().unwrap(),
            EvictionAction::LocalDestroy
        );
        assert_matches!("invalidate".parse::<EvictionAction>(), Err(Error::Config(_)));
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for algorithm in [
            EvictionAlgorithm::None,
            EvictionAlgorithm::EntryCount,
            EvictionAlgorithm::HeapPercentage,
            EvictionAlgorithm::MemorySize,
        ] {
            assert_eq!(algorithm.to_string().parse::<EvictionAlgorithm>().unwrap(), algorithm);
        }
    }

    #[test]
    fn test_combination_rules() {
        assert!(validate_combination(EvictionAlgorithm::None, EvictionAction::None).is_ok());
        assert!(
            validate_combination(EvictionAlgorithm::EntryCount, EvictionAction::LocalDestroy)
                .is_ok()
        );
        assert_matches!(
            validate_combination(EvictionAlgorithm::None, EvictionAction::OverflowToDisk),
            Err(Error::Config(_))
        );
        assert_matches!(
            validate_combination(EvictionAlgorithm::MemorySize, EvictionAction::None),
            Err(Error::Config(_))
        );
    }

    #[test]
    fn test_statistics_names() {
        assert_eq!(
            EvictionAlgorithm::EntryCount.statistics_type(),
            "CountLRUStatistics"
        );
        assert_eq!(
            EvictionAlgorithm::MemorySize.limit_counter_names(),
            ("bytesAllowed", "byteCount")
        );
        assert!(EvictionAlgorithm::HeapPercentage.is_memory_based());
        assert!(!EvictionAlgorithm::EntryCount.is_memory_based());
    }
}
