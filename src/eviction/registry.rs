//! Statistics Registry
//!
//! Process-wide home of every region's [`EvictionStatistics`]. Regions register
//! on creation and unregister on destroy; the registry mirrors their counters
//! into Prometheus gauges labelled by region identity and statistics type.

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder};
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::statistics::{EvictionStatistics, StatsSnapshot};

/// Stable numeric identifiers of the eviction statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StatId {
    Limit = 0,
    Counter = 1,
    Evictions = 2,
    Destroys = 3,
    DestroysLimit = 4,
    Evaluations = 5,
    GreedyReturns = 6,
}

impl StatId {
    /// All statistics in id order
    pub const ALL: [StatId; 7] = [
        StatId::Limit,
        StatId::Counter,
        StatId::Evictions,
        StatId::Destroys,
        StatId::DestroysLimit,
        StatId::Evaluations,
        StatId::GreedyReturns,
    ];

    /// Numeric identifier used by dashboards
    #[inline]
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Metric name suffix
    pub fn metric_name(self) -> &'static str {
        match self {
            StatId::Limit => "limit",
            StatId::Counter => "counter",
            StatId::Evictions => "evictions",
            StatId::Destroys => "destroys",
            StatId::DestroysLimit => "destroys_limit",
            StatId::Evaluations => "evaluations",
            StatId::GreedyReturns => "greedy_returns",
        }
    }

    fn help(self) -> &'static str {
        match self {
            StatId::Limit => "Configured capacity limit in algorithm units",
            StatId::Counter => "Accumulated weight of resident entries",
            StatId::Evictions => "Entries removed or overflowed due to capacity pressure",
            StatId::Destroys => "Entries removed by explicit destroys",
            StatId::DestroysLimit => "Destroy count that triggers list compaction",
            StatId::Evaluations => "Eviction checks performed",
            StatId::GreedyReturns => "Eviction passes that stopped before reaching the limit",
        }
    }

    fn value(self, snapshot: &StatsSnapshot) -> i64 {
        let clamp = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);
        match self {
            StatId::Limit => clamp(snapshot.limit),
            StatId::Counter => snapshot.counter,
            StatId::Evictions => clamp(snapshot.evictions),
            StatId::Destroys => clamp(snapshot.destroys),
            StatId::DestroysLimit => clamp(snapshot.destroys_limit),
            StatId::Evaluations => clamp(snapshot.evaluations),
            StatId::GreedyReturns => clamp(snapshot.greedy_returns),
        }
    }
}

impl fmt::Display for StatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.metric_name())
    }
}

struct Registration {
    stats: Arc<EvictionStatistics>,
    type_name: &'static str,
}

/// Registry of live region statistics
pub struct StatisticsRegistry {
    registry: Registry,
    gauges: Vec<(StatId, IntGaugeVec)>,
    regions: DashMap<String, Registration>,
}

impl StatisticsRegistry {
    /// Metric name prefix
    pub const NAMESPACE: &'static str = "region_eviction";

    /// Create a registry with its own Prometheus registry
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create a registry that exports into `registry`
    pub fn with_registry(registry: Registry) -> Result<Self> {
        let mut gauges = Vec::with_capacity(StatId::ALL.len());
        for stat in StatId::ALL {
            let opts = Opts::new(stat.metric_name(), stat.help()).namespace(Self::NAMESPACE);
            let gauge = IntGaugeVec::new(opts, &["region", "type"])?;
            registry.register(Box::new(gauge.clone()))?;
            gauges.push((stat, gauge));
        }

        Ok(Self {
            registry,
            gauges,
            regions: DashMap::new(),
        })
    }

    /// Allocate and register the statistics of one region or bucket
    ///
    /// `factory` runs only if `identity` is not registered yet.
    pub fn init_stats<F>(
        &self,
        identity: &str,
        type_name: &'static str,
        factory: F,
    ) -> Result<Arc<EvictionStatistics>>
    where
        F: FnOnce() -> EvictionStatistics,
    {
        match self.regions.entry(identity.to_string()) {
            Entry::Occupied(_) => Err(Error::config(format!(
                "Statistics already registered for {identity}"
            ))),
            Entry::Vacant(slot) => {
                let stats = Arc::new(factory());
                slot.insert(Registration {
                    stats: Arc::clone(&stats),
                    type_name,
                });
                info!("Registered {} for {}", type_name, identity);
                Ok(stats)
            }
        }
    }

    /// Drop a region's statistics and its exported series
    pub fn unregister(&self, identity: &str) -> bool {
        let Some((_, registration)) = self.regions.remove(identity) else {
            return false;
        };
        for (_, gauge) in &self.gauges {
            // Series only exist once published
            let _ = gauge.remove_label_values(&[identity, registration.type_name]);
        }
        info!("Unregistered statistics for {}", identity);
        true
    }

    /// Look up a region's statistics
    pub fn get(&self, identity: &str) -> Option<Arc<EvictionStatistics>> {
        self.regions.get(identity).map(|r| Arc::clone(&r.stats))
    }

    /// Number of registered regions
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Check if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Snapshots of every registered region, sorted by identity
    pub fn snapshots(&self) -> Vec<StatsSnapshot> {
        let mut snapshots: Vec<StatsSnapshot> =
            self.regions.iter().map(|r| r.stats.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Copy current counter values into the exported gauges
    pub fn publish(&self) {
        for region in self.regions.iter() {
            let snapshot = region.stats.snapshot();
            let labels = [region.key().as_str(), region.type_name];
            for (stat, gauge) in &self.gauges {
                gauge.with_label_values(&labels).set(stat.value(&snapshot));
            }
        }
        debug!("Published statistics for {} regions", self.regions.len());
    }

    /// Render the Prometheus text exposition
    pub fn encode_text(&self) -> Result<String> {
        self.publish();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }

    /// Underlying Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl fmt::Debug for StatisticsRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatisticsRegistry")
            .field("regions", &self.regions.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
