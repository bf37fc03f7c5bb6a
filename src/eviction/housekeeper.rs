//! Background Housekeeping
//!
//! Periodically asks every registered region to check its resident set against
//! the limit and evict the excess. Writers already evict inline; this pass covers
//! limit reductions, heap-percentage refreshes and greedy returns that left a
//! region over its limit with no further writes arriving.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::{self, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::coordinator::EvictionOutcome;

/// A region that can run a background eviction pass
pub trait Housekeeping: Send + Sync {
    /// Identity used in logs
    fn name(&self) -> &str;

    /// Evict while over the limit
    fn housekeep(&self) -> EvictionOutcome;
}

/// Periodic driver for [`Housekeeping`] passes
pub struct Housekeeper {
    period: Duration,
    targets: RwLock<Vec<Weak<dyn Housekeeping>>>,
    shutdown: CancellationToken,
    passes: AtomicU64,
}

impl Housekeeper {
    /// Create a housekeeper running every `period`
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            targets: RwLock::new(Vec::new()),
            shutdown: CancellationToken::new(),
            passes: AtomicU64::new(0),
        }
    }

    /// Add a region; it is dropped from the rotation once freed
    pub fn register(&self, target: &Arc<dyn Housekeeping>) {
        self.targets.write().push(Arc::downgrade(target));
        debug!("Housekeeper tracking {}", target.name());
    }

    /// Regions still alive
    pub fn target_count(&self) -> usize {
        self.targets
            .read()
            .iter()
            .filter(|t| t.strong_count() > 0)
            .count()
    }

    /// Completed passes
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Run one pass over every live region
    pub fn run_once(&self) -> EvictionOutcome {
        let live: Vec<Arc<dyn Housekeeping>> = {
            let mut targets = self.targets.write();
            targets.retain(|t| t.strong_count() > 0);
            targets.iter().filter_map(Weak::upgrade).collect()
        };

        let mut total = EvictionOutcome::default();
        for target in &live {
            let outcome = target.housekeep();
            if outcome.required {
                debug!(
                    "Housekeeping {}: evicted {}, greedy return {}",
                    target.name(),
                    outcome.evicted,
                    outcome.greedy_return
                );
            }
            total.merge(&outcome);
        }
        self.passes.fetch_add(1, Ordering::Relaxed);
        total
    }

    /// Run passes until [`shutdown`](Self::shutdown) is called
    #[instrument(skip(self))]
    pub async fn run(self: Arc<Self>) {
        info!("Starting housekeeper every {:?}", self.period);

        let mut tick = interval(self.period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Housekeeper shutting down");
                    break;
                }
                _ = tick.tick() => {
                    // Passes may write overflow files; keep them off the executor
                    let keeper = Arc::clone(&self);
                    if let Err(e) = task::spawn_blocking(move || keeper.run_once()).await {
                        warn!("Housekeeping pass failed: {}", e);
                    }
                }
            }
        }
    }

    /// Spawn [`run`](Self::run) on the current runtime
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl fmt::Debug for Housekeeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Housekeeper")
            .field("period", &self.period)
            .field("targets", &self.target_count())
            .field("passes", &self.passes())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
