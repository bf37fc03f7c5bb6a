//! Property-Based Tests for Capacity Accounting
//!
//! Drives single-threaded regions through arbitrary operation sequences and
//! checks the accounting invariants after every step.
//!
//! # Test Properties
//!
//! 1. **Counter Consistency**: the counter equals the weight of resident entries
//! 2. **Bounded Overshoot**: the counter stays within the limit unless a greedy
//!    return was recorded
//! 3. **Entry Conservation**: every entry created is resident, evicted or destroyed
//! 4. **Reset Round-Trip**: recomputing the counter from a scan changes nothing

#![cfg(test)]

use std::sync::Arc;

use proptest::prelude::*;

use crate::config::{EvictionConfig, RegionConfig};
use crate::eviction::{EvictionAction, StatisticsRegistry};
use crate::region::{EntryValue, LocalRegion, RegionContext};

// =============================================================================
// Property Strategies
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Put(u8, i64),
    Get(u8),
    Destroy(u8),
}

/// Strategy over a small key space so keys are revisited often.
fn op_strategy(keys: u8) -> impl Strategy<Value = Op> {
    prop_oneof![
        5 => (0..keys, any::<i64>()).prop_map(|(k, v)| Op::Put(k, v)),
        3 => (0..keys).prop_map(Op::Get),
        1 => (0..keys).prop_map(Op::Destroy),
    ]
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op_strategy(24), 1..300)
}

/// Text values of varying size for memory-based sizing.
fn text_ops_strategy() -> impl Strategy<Value = Vec<(u8, String)>> {
    prop::collection::vec((0u8..16, "[a-z]{0,200}"), 1..150)
}

fn entry_count_region(limit: u64, segments: usize) -> Arc<LocalRegion> {
    let ctx = RegionContext::new(Arc::new(StatisticsRegistry::new().unwrap()));
    let eviction = EvictionConfig::entry_count(limit, EvictionAction::LocalDestroy)
        .with_list_segments(segments);
    LocalRegion::create(&RegionConfig::new("prop", eviction), &ctx).unwrap()
}

fn key(k: u8) -> String {
    format!("key-{k}")
}

// =============================================================================
// Accounting Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: After every operation the counter equals the resident entry
    /// count, and only a greedy return explains a counter above the limit.
    #[test]
    fn prop_counter_tracks_resident_entries(
        limit in 1u64..16,
        segments in 1usize..8,
        ops in ops_strategy(),
    ) {
        let region = entry_count_region(limit, segments);

        for op in &ops {
            match op {
                Op::Put(k, v) => { region.put(key(*k), EntryValue::Int(*v))?; }
                Op::Get(k) => { region.get(key(*k))?; }
                Op::Destroy(k) => { region.destroy(key(*k))?; }
            }

            let snapshot = region.snapshot();
            prop_assert_eq!(snapshot.counter, region.resident_count() as i64);
            prop_assert_eq!(region.len(), region.resident_count());
            prop_assert!(snapshot.counter >= 0);
            prop_assert!(
                snapshot.counter <= limit as i64 || snapshot.greedy_returns > 0,
                "counter {} over limit {} without a greedy return",
                snapshot.counter,
                limit
            );
        }
    }

    /// Property: Every created entry ends up resident, evicted or destroyed,
    /// and destroys are never counted as evictions.
    ///
    /// Puts always use a fresh key so each one creates exactly one entry.
    #[test]
    fn prop_entries_are_conserved(
        limit in 1u64..10,
        ops in ops_strategy(),
    ) {
        let region = entry_count_region(limit, 4);
        let mut created = 0u64;
        let mut destroyed = 0u64;

        for op in &ops {
            match op {
                Op::Put(_, v) => {
                    region.put(format!("fresh-{created}"), EntryValue::Int(*v))?;
                    created += 1;
                }
                Op::Get(k) => { region.get(format!("fresh-{k}"))?; }
                Op::Destroy(k) => {
                    if region.destroy(format!("fresh-{k}"))?.existed {
                        destroyed += 1;
                    }
                }
            }
        }

        let snapshot = region.snapshot();
        prop_assert_eq!(snapshot.destroys, destroyed);
        prop_assert_eq!(snapshot.evictions + snapshot.destroys + region.len() as u64, created);
    }

    /// Property: Recomputing the counter from a scan yields the running value.
    #[test]
    fn prop_reset_round_trip(ops in text_ops_strategy()) {
        let ctx = RegionContext::new(Arc::new(StatisticsRegistry::new().unwrap()));
        let eviction = EvictionConfig::memory_size(4 * 1024, EvictionAction::LocalDestroy);
        let region = LocalRegion::create(&RegionConfig::new("mem", eviction), &ctx).unwrap();

        for (k, text) in &ops {
            region.put(key(*k), EntryValue::text(text.as_str()))?;
        }

        let before = region.snapshot().counter;
        prop_assert_eq!(region.recover_statistics(), before);
        prop_assert_eq!(region.snapshot().counter, before);
    }
}

// =============================================================================
// Limit Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: Applying the same limit twice leaves the statistics unchanged.
    #[test]
    fn prop_set_limit_idempotent(initial in 1u64..1000, next in 1u64..1000) {
        let region = entry_count_region(initial, 2);
        for i in 0..5 {
            region.put(key(i), EntryValue::Int(i64::from(i)))?;
        }

        region.set_limit(next)?;
        let once = region.snapshot();
        region.set_limit(next)?;
        let twice = region.snapshot();

        prop_assert_eq!(once.limit, next);
        prop_assert_eq!(twice.limit, next);
        prop_assert_eq!(once.counter, twice.counter);
        prop_assert_eq!(once.evictions, twice.evictions);
    }
}
