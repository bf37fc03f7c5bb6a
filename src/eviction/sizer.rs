//! Entry Sizing
//!
//! Computes the weight an entry contributes to its region's counter.

use std::fmt::Debug;

use crate::error::{Error, Result};
use crate::region::{EntryKey, EntryValue};

use super::algorithm::EvictionAlgorithm;

/// Default fixed overhead charged per entry by memory-based sizing (bytes)
pub const DEFAULT_ENTRY_OVERHEAD: u32 = 64;

/// Default maximum nesting depth walked when sizing a value
pub const DEFAULT_MAX_SIZING_DEPTH: usize = 32;

/// Charge for a subtree below the depth cap (bytes)
pub const DEPTH_CAP_ESTIMATE: u64 = 4 * 1024;

/// Weight function for one algorithm
pub trait SizeEstimator: Send + Sync + Debug {
    /// Weight of a key/value pair in limit units
    fn entry_size(&self, key: &EntryKey, value: &EntryValue) -> Result<u32>;
}

/// Every entry weighs 1
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryCountSizer;

impl SizeEstimator for EntryCountSizer {
    fn entry_size(&self, _key: &EntryKey, _value: &EntryValue) -> Result<u32> {
        Ok(1)
    }
}

/// Estimated byte footprint of key + value
#[derive(Debug, Clone, Copy)]
pub struct MemorySizer {
    /// Fixed per-entry overhead
    pub entry_overhead: u32,
    /// Deepest nesting level walked before falling back to an estimate
    pub max_depth: usize,
}

impl Default for MemorySizer {
    fn default() -> Self {
        Self {
            entry_overhead: DEFAULT_ENTRY_OVERHEAD,
            max_depth: DEFAULT_MAX_SIZING_DEPTH,
        }
    }
}

impl MemorySizer {
    /// Create a sizer with custom overhead and depth cap
    pub fn new(entry_overhead: u32, max_depth: usize) -> Self {
        Self {
            entry_overhead,
            max_depth: max_depth.max(1),
        }
    }

    fn key_size(key: &EntryKey) -> u64 {
        // String header + hash + bytes
        32 + key.as_str().len() as u64
    }

    fn value_size(&self, key: &EntryKey, value: &EntryValue, depth: usize) -> Result<u64> {
        if depth > self.max_depth {
            return Ok(DEPTH_CAP_ESTIMATE);
        }

        let size = match value {
            EntryValue::Null => 0,
            EntryValue::Bool(_) => 1,
            EntryValue::Int(_) | EntryValue::Float(_) => 8,
            EntryValue::Text(s) => 24 + s.len() as u64,
            EntryValue::Bytes(b) => 32 + b.len() as u64,
            EntryValue::List(items) => {
                let mut total = 24u64;
                for item in items {
                    total = total.saturating_add(16 + self.value_size(key, item, depth + 1)?);
                }
                total
            }
            EntryValue::Map(fields) => {
                let mut total = 48u64;
                for (name, item) in fields {
                    total = total
                        .saturating_add(24 + name.len() as u64)
                        .saturating_add(self.value_size(key, item, depth + 1)?);
                }
                total
            }
            EntryValue::Unresolved(_) => {
                return Err(Error::InvalidEntry {
                    key: key.to_string(),
                    reason: "value must be deserialized before it can be sized".to_string(),
                })
            }
        };
        Ok(size)
    }
}

impl SizeEstimator for MemorySizer {
    fn entry_size(&self, key: &EntryKey, value: &EntryValue) -> Result<u32> {
        let total = (self.entry_overhead as u64)
            .saturating_add(Self::key_size(key))
            .saturating_add(self.value_size(key, value, 0)?);
        Ok(u32::try_from(total).unwrap_or(u32::MAX))
    }
}

/// Build the sizer for an algorithm
pub fn sizer_for(
    algorithm: EvictionAlgorithm,
    entry_overhead: u32,
    max_depth: usize,
) -> Box<dyn SizeEstimator> {
    match algorithm {
        EvictionAlgorithm::None | EvictionAlgorithm::EntryCount => Box::new(EntryCountSizer),
        EvictionAlgorithm::MemorySize | EvictionAlgorithm::HeapPercentage => {
            Box::new(MemorySizer::new(entry_overhead, max_depth))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use std::collections::BTreeMap;

    fn key(k: &str) -> EntryKey {
        EntryKey::new(k)
    }

    #[test]
    fn test_entry_count_is_constant() {
        let sizer = EntryCountSizer;
        assert_eq!(sizer.entry_size(&key("a"), &EntryValue::Null).unwrap(), 1);
        assert_eq!(
            sizer
                .entry_size(&key("a"), &EntryValue::bytes(vec![0u8; 4096]))
                .unwrap(),
            1
        );
        // Counting never needs the value's shape
        assert_eq!(
            sizer
                .entry_size(&key("a"), &EntryValue::Unresolved(Bytes::from_static(b"..")))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_memory_size_grows_with_payload() {
        let sizer = MemorySizer::default();
        let small = sizer
            .entry_size(&key("k"), &EntryValue::bytes(vec![0u8; 10]))
            .unwrap();
        let large = sizer
            .entry_size(&key("k"), &EntryValue::bytes(vec![0u8; 10_000]))
            .unwrap();
        assert_eq!(large - small, 9_990);
        assert!(small > DEFAULT_ENTRY_OVERHEAD);
    }

    #[test]
    fn test_memory_size_counts_key() {
        let sizer = MemorySizer::default();
        let short = sizer.entry_size(&key("k"), &EntryValue::Null).unwrap();
        let long = sizer.entry_size(&key("kkkkk"), &EntryValue::Null).unwrap();
        assert_eq!(long - short, 4);
    }

    #[test]
    fn test_memory_size_walks_structure() {
        let sizer = MemorySizer::default();
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), EntryValue::text("widget"));
        fields.insert(
            "tags".to_string(),
            EntryValue::List(vec![EntryValue::text("a"), EntryValue::text("b")]),
        );
        let flat = sizer.entry_size(&key("k"), &EntryValue::Null).unwrap();
        let nested = sizer
            .entry_size(&key("k"), &EntryValue::Map(fields))
            .unwrap();
        assert!(nested > flat + 100);
    }

    #[test]
    fn test_depth_cap_gives_conservative_estimate() {
        let sizer = MemorySizer::new(0, 4);
        let mut value = EntryValue::Int(1);
        for _ in 0..100 {
            value = EntryValue::List(vec![value]);
        }
        let size = sizer.entry_size(&key("k"), &value).unwrap() as u64;
        // Five list headers walked, then the capped subtree
        assert!(size >= DEPTH_CAP_ESTIMATE);
        assert!(size < DEPTH_CAP_ESTIMATE + 1024);
    }

    #[test]
    fn test_unresolved_value_is_invalid() {
        let sizer = MemorySizer::default();
        let result = sizer.entry_size(
            &key("pending"),
            &EntryValue::Unresolved(Bytes::from_static(b"\x01\x02")),
        );
        assert_matches!(result, Err(Error::InvalidEntry { key, .. }) if key == "pending");
    }

    #[test]
    fn test_sizer_for_algorithm() {
        let v = EntryValue::text("hello");
        let count = sizer_for(EvictionAlgorithm::EntryCount, 64, 8);
        let mem = sizer_for(EvictionAlgorithm::MemorySize, 64, 8);
        let heap = sizer_for(EvictionAlgorithm::HeapPercentage, 64, 8);
        assert_eq!(count.entry_size(&key("k"), &v).unwrap(), 1);
        assert_eq!(
            mem.entry_size(&key("k"), &v).unwrap(),
            heap.entry_size(&key("k"), &v).unwrap()
        );
        assert!(mem.entry_size(&key("k"), &v).unwrap() > 64);
    }
}
