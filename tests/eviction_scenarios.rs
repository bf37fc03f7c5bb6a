//! Eviction Scenario Tests
//!
//! End-to-end behavior of a single bounded region:
//! - Entry-count LRU with local destroy
//! - Overflow to disk and reads of overflowed entries
//! - Greedy exhaustion
//! - Destroy accounting, counter recovery and failure handling

use std::sync::Arc;
use std::thread;

use assert_matches::assert_matches;
use bytes::Bytes;

use region_evict::eviction::Housekeeping;
use region_evict::DiskStore;
use region_evict::{
    EntryValue, Error, EvictionAction, EvictionConfig, FileDiskStore, InMemoryDiskStore,
    LocalRegion, RegionConfig, RegionContext, Residency, StatisticsRegistry,
};

fn context() -> RegionContext {
    RegionContext::new(Arc::new(StatisticsRegistry::new().unwrap()))
}

fn entry_count(name: &str, limit: u64, action: EvictionAction) -> RegionConfig {
    RegionConfig::new(name, EvictionConfig::entry_count(limit, action))
}

// =============================================================================
// LRU Ordering
// =============================================================================

mod lru_tests {
    use super::*;

    #[test]
    fn test_entry_count_evicts_least_recent() {
        let region = LocalRegion::create(
            &entry_count("scenario-a", 3, EvictionAction::LocalDestroy),
            &context(),
        )
        .unwrap();

        for key in ["A", "B", "C"] {
            region.put(key, EntryValue::text(key)).unwrap();
        }
        assert_eq!(region.snapshot().counter, 3);

        let outcome = region.put("D", EntryValue::text("D")).unwrap();
        assert!(outcome.required);
        assert_eq!(outcome.evicted, 1);
        assert!(!outcome.greedy_return);

        let snapshot = region.snapshot();
        assert_eq!(snapshot.evictions, 1);
        assert_eq!(snapshot.destroys, 0);
        assert_eq!(snapshot.counter, 3);
        assert!(!region.contains_key("A"));
        for key in ["B", "C", "D"] {
            assert!(region.contains_key(key), "{key} should be resident");
        }
    }

    #[test]
    fn test_overflow_evicts_untouched_entry() {
        let store = Arc::new(InMemoryDiskStore::new());
        let ctx = context().with_disk_store(store.clone());
        let region = LocalRegion::create(
            &entry_count("scenario-b", 2, EvictionAction::OverflowToDisk),
            &ctx,
        )
        .unwrap();

        region.put("X", EntryValue::Int(1)).unwrap();
        region.put("Y", EntryValue::Int(2)).unwrap();
        // Refresh X
        assert_eq!(region.get("X").unwrap(), Some(EntryValue::Int(1)));

        region.put("Z", EntryValue::Int(3)).unwrap();

        let snapshot = region.snapshot();
        assert_eq!(snapshot.evictions, 1);
        assert_eq!(snapshot.destroys, 0);
        assert_eq!(snapshot.counter, 2);
        assert_eq!(region.residency("X"), Some(Residency::Memory));
        assert_eq!(region.residency("Y"), Some(Residency::Disk));
        assert_eq!(region.residency("Z"), Some(Residency::Memory));
        assert_eq!(region.len(), 3);
        assert_eq!(region.resident_count(), 2);

        // Y stays addressable through the disk store
        assert_eq!(region.get("Y").unwrap(), Some(EntryValue::Int(2)));
        assert_eq!(store.stats().object_count, 1);
    }

    #[test]
    fn test_reading_overflowed_entry_is_not_counted() {
        let ctx = context().with_disk_store(Arc::new(InMemoryDiskStore::new()));
        let region = LocalRegion::create(
            &entry_count("overflow-reads", 1, EvictionAction::OverflowToDisk),
            &ctx,
        )
        .unwrap();

        region.put("cold", EntryValue::text("on disk")).unwrap();
        region.put("hot", EntryValue::text("in memory")).unwrap();

        for _ in 0..10 {
            assert_eq!(region.get("cold").unwrap(), Some(EntryValue::text("on disk")));
        }

        let snapshot = region.snapshot();
        assert_eq!(snapshot.counter, 1);
        assert_eq!(snapshot.evictions, 1);
        assert_eq!(region.residency("cold"), Some(Residency::Disk));
        let disk = region.disk_snapshot().unwrap();
        assert_eq!(disk.overflow_count, 1);
        assert_eq!(disk.resident_size, 1);
    }
}

// =============================================================================
// Greedy Exhaustion
// =============================================================================

mod greedy_tests {
    use super::*;

    fn single_segment(name: &str) -> Arc<LocalRegion> {
        let config = RegionConfig::new(
            name,
            EvictionConfig::entry_count(1, EvictionAction::LocalDestroy).with_list_segments(1),
        );
        LocalRegion::create(&config, &context()).unwrap()
    }

    #[test]
    fn test_fully_marked_list_returns_greedy() {
        let region = single_segment("greedy");
        region.put("seed", EntryValue::Int(0)).unwrap();
        region.get("seed").unwrap();

        let outcome = region.put("next", EntryValue::Int(1)).unwrap();
        assert!(outcome.required);
        assert!(outcome.greedy_return);
        assert_eq!(outcome.evicted, 0);

        let snapshot = region.snapshot();
        assert_eq!(snapshot.greedy_returns, 1);
        assert_eq!(snapshot.counter, 2);
        assert!(region.contains_key("seed"));
        assert!(region.contains_key("next"));

        // The scan cleared the mark; the next write can evict again
        let outcome = region.put("after", EntryValue::Int(2)).unwrap();
        assert!(outcome.evicted >= 1);
    }

    #[test]
    fn test_concurrent_writers_survive_greedy_return() {
        let region = single_segment("greedy-concurrent");
        region.put("seed", EntryValue::Int(0)).unwrap();
        region.get("seed").unwrap();

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let region = region.clone();
                thread::spawn(move || region.put(format!("writer-{i}"), EntryValue::Int(i)))
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }

        let snapshot = region.snapshot();
        assert!(snapshot.greedy_returns >= 1);
        assert_eq!(snapshot.counter, region.resident_count() as i64);
    }

    #[test]
    fn test_greedy_budget_is_configurable() {
        let config = RegionConfig::new(
            "budget",
            EvictionConfig::memory_size(400, EvictionAction::LocalDestroy)
                .with_max_greedy_attempts(1),
        );
        let region = LocalRegion::create(&config, &context()).unwrap();
        for i in 0..3 {
            region.put(format!("s{i}"), EntryValue::Int(i)).unwrap();
        }
        assert_eq!(region.snapshot().evictions, 0);

        // Fitting the large value takes two evictions but only one candidate is tried
        let outcome = region
            .put("large", EntryValue::text("x".repeat(100)))
            .unwrap();
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.evicted, 1);
        assert!(outcome.greedy_return);
        assert_eq!(region.snapshot().greedy_returns, 1);
        assert!(region.snapshot().counter > 400);
    }
}

// =============================================================================
// Destroys, Recovery and Failures
// =============================================================================

mod accounting_tests {
    use super::*;

    #[test]
    fn test_destroys_are_not_evictions() {
        let region = LocalRegion::create(
            &entry_count("destroys", 10, EvictionAction::LocalDestroy),
            &context(),
        )
        .unwrap();
        for i in 0..5 {
            region.put(format!("k{i}"), EntryValue::Int(i)).unwrap();
        }
        for i in 0..3 {
            assert!(region.destroy(format!("k{i}")).unwrap().existed);
        }

        let snapshot = region.snapshot();
        assert_eq!(snapshot.counter, 2);
        assert_eq!(snapshot.destroys, 3);
        assert_eq!(snapshot.evictions, 0);
        assert_eq!(region.resident_count(), 2);
    }

    #[test]
    fn test_destroys_limit_compacts_list() {
        let config = RegionConfig::new(
            "compaction",
            EvictionConfig::entry_count(100, EvictionAction::LocalDestroy)
                .with_destroys_limit(4)
                .with_list_segments(2),
        );
        let region = LocalRegion::create(&config, &context()).unwrap();
        for i in 0..10 {
            region.put(format!("k{i}"), EntryValue::Int(i)).unwrap();
        }

        let flags: Vec<bool> = (0..8)
            .map(|i| region.destroy(format!("k{i}")).unwrap().destroys_limit_reached)
            .collect();
        assert_eq!(
            flags,
            vec![false, false, false, true, false, false, false, true]
        );

        let list = region.coordinator().list();
        assert_eq!(list.len(), 2);
        assert_eq!(list.segment_lengths().iter().sum::<usize>(), 2);
    }

    #[test]
    fn test_recover_statistics_matches_running_counter() {
        let config = RegionConfig::new(
            "recover",
            EvictionConfig::memory_size(10_000, EvictionAction::LocalDestroy),
        );
        let region = LocalRegion::create(&config, &context()).unwrap();
        for i in 0..50 {
            region
                .put(format!("k{i}"), EntryValue::text("v".repeat(i)))
                .unwrap();
        }
        region.destroy("k3").unwrap();

        let running = region.snapshot().counter;
        assert!(running > 0);
        assert_eq!(region.recover_statistics(), running);
        assert_eq!(region.snapshot().counter, running);
    }

    #[test]
    fn test_unsizable_value_aborts_write() {
        let config = RegionConfig::new(
            "invalid",
            EvictionConfig::memory_size(1 << 20, EvictionAction::LocalDestroy),
        );
        let region = LocalRegion::create(&config, &context()).unwrap();
        region.put("ok", EntryValue::Int(1)).unwrap();
        let before = region.snapshot();

        let result = region.put("bad", EntryValue::Unresolved(Bytes::from_static(b"\x01\x02")));
        assert_matches!(result, Err(Error::InvalidEntry { key, .. }) if key == "bad");

        let after = region.snapshot();
        assert_eq!(after.counter, before.counter);
        assert_eq!(after.evictions, before.evictions);
        assert!(!region.contains_key("bad"));
    }

    #[test]
    fn test_failed_overflow_rolls_back() {
        let store = Arc::new(InMemoryDiskStore::new());
        let ctx = context().with_disk_store(store.clone());
        let region = LocalRegion::create(
            &entry_count("disk-full", 1, EvictionAction::OverflowToDisk),
            &ctx,
        )
        .unwrap();

        region.put("a", EntryValue::Int(1)).unwrap();
        store.set_fail_writes(true);

        // The write still succeeds; the failed candidate stays resident
        let outcome = region.put("b", EntryValue::Int(2)).unwrap();
        assert!(outcome.failures >= 1);
        assert_eq!(outcome.evicted, 0);
        assert!(outcome.greedy_return);
        assert_eq!(region.residency("a"), Some(Residency::Memory));
        assert_eq!(region.get("a").unwrap(), Some(EntryValue::Int(1)));

        let snapshot = region.snapshot();
        assert_eq!(snapshot.counter, 2);
        assert_eq!(snapshot.evictions, 0);
        assert!(!store.contains(&"a".into()));

        // Once the store recovers, housekeeping brings the region back under its limit
        store.set_fail_writes(false);
        let outcome = region.housekeep();
        assert_eq!(outcome.evicted, 1);
        assert_eq!(region.snapshot().counter, 1);
        assert_eq!(region.snapshot().evictions, 1);
    }

    #[test]
    fn test_file_store_overflow() {
        let dir = std::env::temp_dir().join(format!("region-evict-{}", uuid::Uuid::new_v4()));
        let mut config = entry_count("files", 1, EvictionAction::OverflowToDisk);
        config.overflow_dir = Some(dir.clone());
        let region = LocalRegion::create(&config, &context()).unwrap();

        let payload = EntryValue::bytes(Bytes::from_static(b"persisted payload"));
        region.put("first", payload.clone()).unwrap();
        region.put("second", EntryValue::Int(2)).unwrap();

        assert_eq!(region.residency("first"), Some(Residency::Disk));
        assert_eq!(region.get("first").unwrap(), Some(payload));
        let store = FileDiskStore::open(dir.join("files")).unwrap();
        assert_eq!(store.stats().object_count, 1);

        region.destroy_region().unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }
}

// =============================================================================
// Configuration Errors
// =============================================================================

mod config_tests {
    use super::*;
    use region_evict::eviction::EvictionAlgorithm;

    #[test]
    fn test_zero_limit_rejected() {
        let result = LocalRegion::create(
            &entry_count("zero", 0, EvictionAction::LocalDestroy),
            &context(),
        );
        assert_matches!(result, Err(Error::Config(_)));
    }

    #[test]
    fn test_heap_percentage_out_of_range() {
        for percentage in [0.0, -5.0, 100.5, f64::NAN] {
            let config = RegionConfig::new(
                "heap",
                EvictionConfig::heap_percentage(percentage, EvictionAction::LocalDestroy),
            );
            assert_matches!(LocalRegion::create(&config, &context()), Err(Error::Config(_)));
        }
    }

    #[test]
    fn test_action_without_algorithm() {
        let mut eviction = EvictionConfig::disabled();
        eviction.action = EvictionAction::LocalDestroy;
        let config = RegionConfig::new("mismatch", eviction);
        assert_matches!(LocalRegion::create(&config, &context()), Err(Error::Config(_)));
    }

    #[test]
    fn test_set_limit_validation() {
        let region = LocalRegion::create(
            &entry_count("limits", 5, EvictionAction::LocalDestroy),
            &context(),
        )
        .unwrap();
        assert_matches!(region.set_limit(0), Err(Error::Config(_)));
        assert_eq!(region.snapshot().limit, 5);

        let disabled = LocalRegion::create(
            &RegionConfig::new("unbounded", EvictionConfig::disabled()),
            &context(),
        )
        .unwrap();
        assert_eq!(
            disabled.coordinator().controller().algorithm(),
            EvictionAlgorithm::None
        );
        assert_matches!(disabled.set_limit(10), Err(Error::Config(_)));
    }

    #[test]
    fn test_duplicate_region_name() {
        let ctx = context();
        let config = entry_count("twice", 5, EvictionAction::LocalDestroy);
        let _first = LocalRegion::create(&config, &ctx).unwrap();
        assert_matches!(LocalRegion::create(&config, &ctx), Err(Error::Config(_)));
    }
}
