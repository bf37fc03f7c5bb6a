//! Segmented CLOCK Eviction List
//!
//! Approximate LRU ordering over a region's resident entries.
//!
//! # Design
//!
//! - Entries are striped across segments by key hash; each segment is a FIFO ring
//!   behind its own short-lived mutex
//! - `touch` only sets a recency bit on the entry's link (lock-free)
//! - The eviction scan pops from the front of a segment: marked entries get their
//!   bit cleared and go to the back (second chance), the first unmarked entry is
//!   claimed as the candidate
//! - A scan of one segment visits at most the entries present when it started, so
//!   a fully marked segment yields `None` after one rotation
//! - Segments are tried oldest-front-first, using a logical clock stamped on
//!   insertion and requeue
//! - Destroyed entries are retired lazily and dropped when a scan or purge meets them

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use parking_lot::Mutex;

const DETACHED: u8 = 0;
const UNMARKED: u8 = 1;
const MARKED: u8 = 2;
const EVICTED: u8 = 3;
const REMOVED: u8 = 4;

/// Recency state of a linked entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Never linked
    Detached,
    /// Linked, not used since the last scan
    LiveUnmarked,
    /// Linked and recently used
    LiveMarked,
    /// Claimed by an eviction scan and unlinked
    Evicted,
    /// Retired by an explicit destroy
    Removed,
}

impl LinkState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            UNMARKED => LinkState::LiveUnmarked,
            MARKED => LinkState::LiveMarked,
            EVICTED => LinkState::Evicted,
            REMOVED => LinkState::Removed,
            _ => LinkState::Detached,
        }
    }

    /// Returns true for the two linked states
    pub fn is_live(&self) -> bool {
        matches!(self, LinkState::LiveUnmarked | LinkState::LiveMarked)
    }
}

/// Recency marker embedded in every evictable entry
pub struct LruLink {
    state: AtomicU8,
    tick: AtomicU64,
}

impl Default for LruLink {
    fn default() -> Self {
        Self::new()
    }
}

impl LruLink {
    /// Create a detached link
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(DETACHED),
            tick: AtomicU64::new(0),
        }
    }

    /// Current state
    #[inline]
    pub fn state(&self) -> LinkState {
        LinkState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Returns true if the entry is linked
    #[inline]
    pub fn is_live(&self) -> bool {
        self.state().is_live()
    }

    /// Logical time the entry last entered its segment
    #[inline]
    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    #[inline]
    fn cas(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn attach(&self, state: u8, tick: u64) {
        self.tick.store(tick, Ordering::Relaxed);
        self.state.store(state, Ordering::Release);
    }

    fn retire(&self) -> LinkState {
        LinkState::from_raw(self.state.swap(REMOVED, Ordering::AcqRel))
    }
}

impl fmt::Debug for LruLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruLink")
            .field("state", &self.state())
            .field("tick", &self.tick())
            .finish()
    }
}

/// An entry that can be ordered by the eviction list
pub trait LruEntry: Send + Sync {
    /// The embedded recency marker
    fn link(&self) -> &LruLink;

    /// Stable hash used to pick the entry's segment
    fn segment_hint(&self) -> u64;
}

type Segment<E> = CachePadded<Mutex<VecDeque<Arc<E>>>>;

/// Segmented second-chance eviction list
pub struct EvictionList<E: LruEntry> {
    segments: Box<[Segment<E>]>,
    clock: AtomicU64,
    live: AtomicUsize,
}

impl<E: LruEntry> EvictionList<E> {
    /// Create a list with `segments` independent segments (at least one)
    pub fn new(segments: usize) -> Self {
        let segments: Vec<Segment<E>> = (0..segments.max(1))
            .map(|_| CachePadded::new(Mutex::new(VecDeque::new())))
            .collect();
        Self {
            segments: segments.into_boxed_slice(),
            clock: AtomicU64::new(1),
            live: AtomicUsize::new(0),
        }
    }

    /// Number of segments
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Number of linked entries
    pub fn len(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Returns true if nothing is linked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn segment_of(&self, entry: &E) -> usize {
        // Fibonacci mix, high half: callers that route by the folded low bits
        // of the same hash (partition buckets) still spread over every segment
        let mixed = entry.segment_hint().wrapping_mul(0x9E37_79B9_7F4A_7C15);
        ((mixed >> 32) as usize) % self.segments.len()
    }

    #[inline]
    fn next_tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Link an entry that is not currently linked, unmarked
    pub fn insert(&self, entry: Arc<E>) {
        self.link_back(entry, UNMARKED);
    }

    /// Put a claimed entry back, marked so the next scan passes over it
    pub fn requeue(&self, entry: Arc<E>) {
        self.link_back(entry, MARKED);
    }

    fn link_back(&self, entry: Arc<E>, state: u8) {
        let idx = self.segment_of(&entry);
        let mut segment = self.segments[idx].lock();
        entry.link().attach(state, self.next_tick());
        segment.push_back(entry);
        self.live.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark an entry as recently used
    ///
    /// Best effort: a touch racing with a scan may be lost.
    #[inline]
    pub fn touch(&self, entry: &E) -> bool {
        entry.link().cas(UNMARKED, MARKED) || entry.link().state() == LinkState::LiveMarked
    }

    /// Retire an entry; returns true if it was linked
    pub fn remove(&self, entry: &E) -> bool {
        let was_live = entry.link().retire().is_live();
        if was_live {
            self.live.fetch_sub(1, Ordering::Relaxed);
        }
        was_live
    }

    /// Claim the next eviction candidate
    ///
    /// Returns `None` if every segment completed a rotation without finding an
    /// unmarked entry. The claimed entry is unlinked and in `Evicted` state.
    /// Segments held by another thread are skipped on the first sweep and only
    /// waited on when no other segment yields a candidate.
    pub fn evict_candidate(&self) -> Option<Arc<E>> {
        let mut busy = Vec::new();
        for idx in self.scan_order() {
            match self.segments[idx].try_lock() {
                Some(mut queue) => {
                    if let Some(entry) = self.scan_queue(&mut queue) {
                        return Some(entry);
                    }
                }
                None => busy.push(idx),
            }
        }
        busy.into_iter()
            .find_map(|idx| self.scan_queue(&mut self.segments[idx].lock()))
    }

    /// Segment indices ordered by the age of their front entry
    fn scan_order(&self) -> Vec<usize> {
        let mut fronts: Vec<(u64, usize)> = Vec::with_capacity(self.segments.len());
        for (idx, segment) in self.segments.iter().enumerate() {
            match segment.try_lock() {
                Some(mut queue) => {
                    while queue.front().is_some_and(|e| !e.link().is_live()) {
                        queue.pop_front();
                    }
                    if let Some(front) = queue.front() {
                        fronts.push((front.link().tick(), idx));
                    }
                }
                // Busy segment: try it last
                None => fronts.push((u64::MAX, idx)),
            }
        }
        fronts.sort_unstable();
        fronts.into_iter().map(|(_, idx)| idx).collect()
    }

    /// One rotation over a locked segment
    fn scan_queue(&self, queue: &mut VecDeque<Arc<E>>) -> Option<Arc<E>> {
        let budget = queue.len();

        for _ in 0..budget {
            let entry = queue.pop_front()?;
            let link = entry.link();
            match link.state() {
                LinkState::LiveMarked => {
                    link.cas(MARKED, UNMARKED);
                    link.tick.store(self.next_tick(), Ordering::Relaxed);
                    queue.push_back(entry);
                }
                LinkState::LiveUnmarked => {
                    if link.cas(UNMARKED, EVICTED) {
                        self.live.fetch_sub(1, Ordering::Relaxed);
                        return Some(entry);
                    }
                    // Touched or retired under us; let the next visit decide
                    queue.push_back(entry);
                }
                _ => {}
            }
        }
        None
    }

    /// Drop retired links from every segment; returns how many were dropped
    pub fn purge(&self) -> usize {
        self.segments
            .iter()
            .map(|segment| {
                let mut queue = segment.lock();
                let before = queue.len();
                queue.retain(|e| e.link().is_live());
                before - queue.len()
            })
            .sum()
    }

    /// Physical length of every segment, including retired links not yet dropped
    pub fn segment_lengths(&self) -> Vec<usize> {
        self.segments.iter().map(|s| s.lock().len()).collect()
    }
}

impl<E: LruEntry> fmt::Debug for EvictionList<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvictionList")
            .field("segments", &self.segments.len())
            .field("live", &self.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
