//! Memory observers for heap-percentage limits

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use sysinfo::System;

/// Source of the total memory a heap-percentage limit is computed from
pub trait MemoryObserver: Send + Sync + Debug {
    /// Total memory available to the process, in bytes
    fn total_memory(&self) -> u64;
}

/// Host memory as reported by the operating system
pub struct SystemMemoryObserver {
    system: Mutex<System>,
}

impl SystemMemoryObserver {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemoryObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for SystemMemoryObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemMemoryObserver").finish()
    }
}

impl MemoryObserver for SystemMemoryObserver {
    fn total_memory(&self) -> u64 {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.total_memory()
    }
}

/// Fixed, adjustable memory total (tests and embedded use)
#[derive(Debug, Default)]
pub struct FixedMemoryObserver {
    total: AtomicU64,
}

impl FixedMemoryObserver {
    pub fn new(total: u64) -> Self {
        Self {
            total: AtomicU64::new(total),
        }
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }
}

impl MemoryObserver for FixedMemoryObserver {
    fn total_memory(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

/// Limit for `percentage` percent of `total` bytes
pub fn heap_limit(percentage: f64, total: u64) -> u64 {
    ((total as f64) * (percentage / 100.0)).floor() as u64
}
