//! Region and eviction configuration
//!
//! Loaded from YAML at region-creation time. Every field has a default so a
//! minimal document only names what it changes:
//!
//! ```yaml
//! name: orders
//! buckets: 8
//! eviction:
//!   algorithm: entry-count
//!   action: overflow-to-disk
//!   limit: 10000
//! overflow_dir: /var/lib/region-evict/orders
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::eviction::{validate_combination, EvictionAction, EvictionAlgorithm};

/// Default greedy-attempt budget per eviction pass
pub const DEFAULT_MAX_GREEDY_ATTEMPTS: u32 = 32;

/// Default destroy count between list compactions
pub const DEFAULT_DESTROYS_LIMIT: u64 = 1000;

/// Default number of eviction list segments
pub const DEFAULT_LIST_SEGMENTS: usize = 16;

/// Default number of storage shards per region
pub const DEFAULT_STORAGE_SHARDS: usize = 64;

/// Capacity policy of one region (applied per bucket when partitioned)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    /// How entries are weighed
    pub algorithm: EvictionAlgorithm,
    /// What happens to evicted entries
    pub action: EvictionAction,
    /// Entry count or byte limit (ignored for heap-percentage)
    pub limit: u64,
    /// Share of host memory for heap-percentage, in (0, 100]
    pub heap_percentage: f64,
    /// Candidates tried per eviction pass before giving up
    pub max_greedy_attempts: u32,
    /// Destroy count between list compactions; 0 disables compaction
    pub destroys_limit: u64,
    /// Eviction list segments
    pub list_segments: usize,
    /// Fixed per-entry charge for memory-based sizing (bytes)
    pub entry_overhead: u32,
    /// Deepest value nesting walked when sizing
    pub max_sizing_depth: usize,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

impl EvictionConfig {
    /// No capacity bound
    pub fn disabled() -> Self {
        Self {
            algorithm: EvictionAlgorithm::None,
            action: EvictionAction::None,
            limit: 0,
            heap_percentage: 0.0,
            max_greedy_attempts: DEFAULT_MAX_GREEDY_ATTEMPTS,
            destroys_limit: DEFAULT_DESTROYS_LIMIT,
            list_segments: DEFAULT_LIST_SEGMENTS,
            entry_overhead: crate::eviction::DEFAULT_ENTRY_OVERHEAD,
            max_sizing_depth: crate::eviction::DEFAULT_MAX_SIZING_DEPTH,
        }
    }

    /// Bound by entry count
    pub fn entry_count(limit: u64, action: EvictionAction) -> Self {
        Self {
            algorithm: EvictionAlgorithm::EntryCount,
            action,
            limit,
            ..Self::disabled()
        }
    }

    /// Bound by estimated bytes
    pub fn memory_size(limit_bytes: u64, action: EvictionAction) -> Self {
        Self {
            algorithm: EvictionAlgorithm::MemorySize,
            action,
            limit: limit_bytes,
            ..Self::disabled()
        }
    }

    /// Bound by a share of host memory
    pub fn heap_percentage(percentage: f64, action: EvictionAction) -> Self {
        Self {
            algorithm: EvictionAlgorithm::HeapPercentage,
            action,
            heap_percentage: percentage,
            ..Self::disabled()
        }
    }

    /// Set the greedy-attempt budget
    pub fn with_max_greedy_attempts(mut self, attempts: u32) -> Self {
        self.max_greedy_attempts = attempts;
        self
    }

    /// Set the destroys limit
    pub fn with_destroys_limit(mut self, limit: u64) -> Self {
        self.destroys_limit = limit;
        self
    }

    /// Set the list segment count
    pub fn with_list_segments(mut self, segments: usize) -> Self {
        self.list_segments = segments;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validate_combination(self.algorithm, self.action)?;

        match self.algorithm {
            EvictionAlgorithm::EntryCount | EvictionAlgorithm::MemorySize if self.limit == 0 => {
                return Err(Error::config(format!(
                    "limit must be > 0 for {}",
                    self.algorithm
                )));
            }
            EvictionAlgorithm::HeapPercentage => validate_percentage(self.heap_percentage)?,
            _ => {}
        }

        if self.max_greedy_attempts == 0 {
            return Err(Error::config("max_greedy_attempts must be > 0"));
        }
        if self.list_segments == 0 {
            return Err(Error::config("list_segments must be > 0"));
        }
        if self.max_sizing_depth == 0 {
            return Err(Error::config("max_sizing_depth must be > 0"));
        }
        Ok(())
    }
}

/// Check a heap percentage is in (0, 100]
pub fn validate_percentage(percentage: f64) -> Result<()> {
    if percentage.is_finite() && percentage > 0.0 && percentage <= 100.0 {
        Ok(())
    } else {
        Err(Error::config(format!(
            "heap_percentage must be in (0, 100], got {percentage}"
        )))
    }
}

/// One region's full setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// Region name
    pub name: String,
    /// Bucket count for a partitioned region; `None` for a single local region
    pub buckets: Option<u32>,
    /// Storage shards per region or bucket
    pub storage_shards: usize,
    /// Capacity policy
    pub eviction: EvictionConfig,
    /// Directory for overflowed values; an in-memory store is used when unset
    pub overflow_dir: Option<PathBuf>,
    /// Background housekeeping period in seconds; 0 disables it
    pub housekeeping_interval_secs: u64,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            buckets: None,
            storage_shards: DEFAULT_STORAGE_SHARDS,
            eviction: EvictionConfig::default(),
            overflow_dir: None,
            housekeeping_interval_secs: 10,
        }
    }
}

impl RegionConfig {
    /// Create a local region config
    pub fn new(name: impl Into<String>, eviction: EvictionConfig) -> Self {
        Self {
            name: name.into(),
            eviction,
            ..Self::default()
        }
    }

    /// Make the region partitioned into `buckets` buckets
    pub fn partitioned(mut self, buckets: u32) -> Self {
        self.buckets = Some(buckets);
        self
    }

    /// Parse from a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Housekeeping period, if enabled
    pub fn housekeeping_interval(&self) -> Option<Duration> {
        (self.housekeeping_interval_secs > 0)
            .then(|| Duration::from_secs(self.housekeeping_interval_secs))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::config("region name must not be empty"));
        }
        if self.buckets == Some(0) {
            return Err(Error::config("buckets must be > 0"));
        }
        if self.storage_shards == 0 {
            return Err(Error::config("storage_shards must be > 0"));
        }
        self.eviction.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
