//! Region Entry Types
//!
//! Keys, opaque values, and the per-key entry record shared between the region
//! storage and the eviction list.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::eviction::{LruEntry, LruLink};

/// Region key with a precomputed hash
#[derive(Clone, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct EntryKey {
    /// FxHash of the key bytes
    hash: u64,
    /// Full key
    key: String,
}

impl EntryKey {
    /// Create a new entry key
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        let hash = Self::fx_hash(key.as_bytes());
        Self { hash, key }
    }

    /// Fast non-cryptographic hash (FxHash algorithm)
    #[inline]
    fn fx_hash(bytes: &[u8]) -> u64 {
        const SEED: u64 = 0x517cc1b727220a95;
        let mut hash = SEED;
        for &byte in bytes {
            hash = hash.rotate_left(5) ^ (byte as u64);
            hash = hash.wrapping_mul(SEED);
        }
        hash
    }

    /// Get the key text
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Get the precomputed hash
    #[inline]
    pub fn hash_code(&self) -> u64 {
        self.hash
    }

    /// Map this key onto one of `count` slots
    #[inline]
    pub fn slot(&self, count: usize) -> usize {
        // Fold the high bits in so power-of-two masks see them
        let folded = self.hash ^ (self.hash >> 32);
        (folded as usize) % count.max(1)
    }
}

impl PartialEq for EntryKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.key == other.key
    }
}

impl Hash for EntryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Debug for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.key)
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl From<String> for EntryKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

impl From<&str> for EntryKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<EntryKey> for String {
    fn from(key: EntryKey) -> Self {
        key.key
    }
}

/// Opaque stored value
///
/// The engine never interprets values beyond walking their shape for sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum EntryValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Bytes),
    List(Vec<EntryValue>),
    Map(BTreeMap<String, EntryValue>),
    /// Serialized form that has not been deserialized yet
    Unresolved(Bytes),
}

impl EntryValue {
    /// Convenience constructor for text values
    pub fn text(s: impl Into<String>) -> Self {
        EntryValue::Text(s.into())
    }

    /// Convenience constructor for byte values
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        EntryValue::Bytes(data.into())
    }
}

impl From<&str> for EntryValue {
    fn from(s: &str) -> Self {
        EntryValue::Text(s.to_string())
    }
}

impl From<i64> for EntryValue {
    fn from(v: i64) -> Self {
        EntryValue::Int(v)
    }
}

/// Where the value of an entry currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// Created but not yet populated
    Vacant,
    /// Value held in memory and counted against the limit
    Memory,
    /// Value overflowed to the disk store; key still addressable
    Disk,
    /// Removed from the region; never revived
    Gone,
}

/// Mutable part of an entry, guarded by the entry lock
#[derive(Debug)]
pub struct EntrySlot {
    /// In-memory value, `None` unless resident
    pub value: Option<EntryValue>,
    /// Residency state
    pub residency: Residency,
}

/// A key's record in a region
///
/// Residency transitions happen under the slot lock; whoever moves an entry out
/// of `Memory` owns the matching counter decrement.
pub struct RegionEntry {
    key: EntryKey,
    slot: Mutex<EntrySlot>,
    /// Weight currently charged to the region counter (0 unless resident)
    charged: AtomicU32,
    link: LruLink,
}

impl RegionEntry {
    /// Create a vacant entry for `key`
    pub fn vacant(key: EntryKey) -> Self {
        Self {
            key,
            slot: Mutex::new(EntrySlot {
                value: None,
                residency: Residency::Vacant,
            }),
            charged: AtomicU32::new(0),
            link: LruLink::new(),
        }
    }

    /// Get the key
    #[inline]
    pub fn key(&self) -> &EntryKey {
        &self.key
    }

    /// Lock the value slot
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, EntrySlot> {
        self.slot.lock()
    }

    /// Current residency
    pub fn residency(&self) -> Residency {
        self.slot.lock().residency
    }

    /// Weight currently charged to the region counter
    ///
    /// Readable without the slot lock so counter re-scans never block on writers.
    #[inline]
    pub fn weight(&self) -> u32 {
        self.charged.load(Ordering::Acquire)
    }

    /// Replace the charged weight, returning the previous one
    pub(crate) fn swap_weight(&self, weight: u32) -> u32 {
        self.charged.swap(weight, Ordering::AcqRel)
    }
}

impl LruEntry for RegionEntry {
    #[inline]
    fn link(&self) -> &LruLink {
        &self.link
    }

    #[inline]
    fn segment_hint(&self) -> u64 {
        self.key.hash_code()
    }
}

impl fmt::Debug for RegionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionEntry")
            .field("key", &self.key)
            .field("weight", &self.weight())
            .field("link", &self.link)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
