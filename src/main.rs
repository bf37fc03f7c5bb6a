//! Region Evict
//!
//! Drives a bounded region with a synthetic workload and reports its
//! eviction statistics.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          region-evict                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Workload   │───▶│    Region    │───▶│  Statistics  │       │
//! │  │   threads    │    │  (buckets)   │    │   Registry   │       │
//! │  └──────────────┘    └──────┬───────┘    └──────┬───────┘       │
//! │                             │                   │               │
//! │                      ┌──────▼───────┐    ┌──────▼───────┐       │
//! │                      │ Housekeeper  │    │  /metrics    │       │
//! │                      └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use region_evict::disk::DiskRegionSnapshot;
use region_evict::eviction::SystemMemoryObserver;
use region_evict::{
    EntryValue, EvictionAction, EvictionAlgorithm, EvictionOutcome, Housekeeper, Housekeeping,
    LocalRegion, PartitionedRegion, RegionConfig, RegionContext, StatisticsRegistry,
    StatsSnapshot,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Region Evict - bounded in-memory region workload driver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Region configuration file (YAML)
    #[arg(long, env = "REGION_CONFIG")]
    config: Option<PathBuf>,

    /// Region name (overrides the config file)
    #[arg(long, env = "REGION_NAME")]
    name: Option<String>,

    /// Eviction algorithm (none, entry-count, memory-size, heap-percentage)
    #[arg(long, env = "EVICTION_ALGORITHM")]
    algorithm: Option<String>,

    /// Eviction action (none, local-destroy, overflow-to-disk)
    #[arg(long, env = "EVICTION_ACTION")]
    action: Option<String>,

    /// Entry count or byte limit
    #[arg(long, env = "EVICTION_LIMIT")]
    limit: Option<u64>,

    /// Share of host memory for heap-percentage regions
    #[arg(long, env = "EVICTION_HEAP_PERCENTAGE")]
    heap_percentage: Option<f64>,

    /// Bucket count; makes the region partitioned
    #[arg(long, env = "REGION_BUCKETS")]
    buckets: Option<u32>,

    /// Directory for overflowed values
    #[arg(long, env = "OVERFLOW_DIR")]
    overflow_dir: Option<PathBuf>,

    /// Distinct keys touched by the workload
    #[arg(long, env = "WORKLOAD_KEYS", default_value = "10000")]
    keys: u64,

    /// Operations per worker thread
    #[arg(long, env = "WORKLOAD_OPS", default_value = "100000")]
    ops: u64,

    /// Worker threads
    #[arg(long, env = "WORKLOAD_THREADS", default_value = "4")]
    threads: usize,

    /// Bytes per written value
    #[arg(long, env = "WORKLOAD_VALUE_SIZE", default_value = "128")]
    value_size: usize,

    /// Fraction of operations that are reads
    #[arg(long, env = "WORKLOAD_READ_RATIO", default_value = "0.5")]
    read_ratio: f64,

    /// Fraction of operations that are explicit destroys
    #[arg(long, env = "WORKLOAD_DESTROY_RATIO", default_value = "0.05")]
    destroy_ratio: f64,

    /// Serve /metrics and /healthz on this address and keep running after the workload
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;
    info!("Starting region-evict");
    info!("  Region: {}", config.name);
    info!(
        "  Eviction: {} / {} (limit {}, heap {}%)",
        config.eviction.algorithm,
        config.eviction.action,
        config.eviction.limit,
        config.eviction.heap_percentage
    );
    info!("  Buckets: {:?}", config.buckets);
    info!(
        "  Workload: {} threads x {} ops over {} keys",
        args.threads, args.ops, args.keys
    );

    let registry = Arc::new(StatisticsRegistry::new().context("creating statistics registry")?);
    let ctx = RegionContext::new(Arc::clone(&registry))
        .with_memory_observer(Arc::new(SystemMemoryObserver::new()));

    let region = Region::create(&config, &ctx)
        .with_context(|| format!("creating region {}", config.name))?;

    // Start housekeeping
    let housekeeper = config.housekeeping_interval().map(|period| {
        let keeper = Arc::new(Housekeeper::new(period));
        keeper.register(&region.housekeeping());
        let handle = keeper.spawn();
        (keeper, handle)
    });

    // Start metrics server
    if let Some(addr) = args.metrics_addr.clone() {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(&addr, registry).await {
                error!("Metrics server error: {:#}", e);
            }
        });
    }

    let report = run_workload(&args, region.clone()).await?;
    registry.publish();

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("rendering report")?
    );

    if args.metrics_addr.is_some() {
        info!("Workload finished; serving metrics until interrupted");
        tokio::signal::ctrl_c()
            .await
            .context("waiting for shutdown signal")?;
    }

    if let Some((keeper, handle)) = housekeeper {
        keeper.shutdown();
        if let Err(e) = handle.await {
            error!("Housekeeper task failed: {}", e);
        }
    }

    region.destroy().context("destroying region")?;
    info!("Shutdown complete");
    Ok(())
}

/// Config file (or defaults) with command-line overrides applied
fn load_config(args: &Args) -> Result<RegionConfig> {
    let mut config = match &args.config {
        Some(path) => RegionConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RegionConfig::default(),
    };

    if let Some(name) = &args.name {
        config.name = name.clone();
    }
    if let Some(algorithm) = &args.algorithm {
        config.eviction.algorithm = algorithm.parse::<EvictionAlgorithm>()?;
    }
    if let Some(action) = &args.action {
        config.eviction.action = action.parse::<EvictionAction>()?;
    }
    if let Some(limit) = args.limit {
        config.eviction.limit = limit;
    }
    if let Some(percentage) = args.heap_percentage {
        config.eviction.heap_percentage = percentage;
    }
    if args.buckets.is_some() {
        config.buckets = args.buckets;
    }
    if args.overflow_dir.is_some() {
        config.overflow_dir = args.overflow_dir.clone();
    }

    config.validate().context("invalid region configuration")?;
    Ok(config)
}

// =============================================================================
// Region
// =============================================================================

#[derive(Clone)]
enum Region {
    Local(Arc<LocalRegion>),
    Partitioned(Arc<PartitionedRegion>),
}

impl Region {
    fn create(config: &RegionConfig, ctx: &RegionContext) -> region_evict::Result<Self> {
        Ok(match config.buckets {
            Some(_) => Region::Partitioned(PartitionedRegion::create(config, ctx)?),
            None => Region::Local(LocalRegion::create(config, ctx)?),
        })
    }

    fn housekeeping(&self) -> Arc<dyn Housekeeping> {
        match self {
            Region::Local(r) => Arc::clone(r) as Arc<dyn Housekeeping>,
            Region::Partitioned(r) => Arc::clone(r) as Arc<dyn Housekeeping>,
        }
    }

    fn put(&self, key: String, value: EntryValue) -> region_evict::Result<EvictionOutcome> {
        match self {
            Region::Local(r) => r.put(key, value),
            Region::Partitioned(r) => r.put(key, value),
        }
    }

    fn get(&self, key: String) -> region_evict::Result<Option<EntryValue>> {
        match self {
            Region::Local(r) => r.get(key),
            Region::Partitioned(r) => r.get(key),
        }
    }

    fn remove(&self, key: String) -> region_evict::Result<bool> {
        match self {
            Region::Local(r) => r.destroy(key).map(|o| o.existed),
            Region::Partitioned(r) => r.destroy(key).map(|o| o.existed),
        }
    }

    fn len(&self) -> usize {
        match self {
            Region::Local(r) => r.len(),
            Region::Partitioned(r) => r.len(),
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        match self {
            Region::Local(r) => r.snapshot(),
            Region::Partitioned(r) => r.snapshot(),
        }
    }

    fn disk_snapshot(&self) -> Option<DiskRegionSnapshot> {
        match self {
            Region::Local(r) => r.disk_snapshot(),
            Region::Partitioned(r) => {
                let mut buckets = r.buckets().iter().filter_map(|b| b.disk_snapshot());
                let mut total = buckets.next()?;
                for bucket in buckets {
                    total.merge(&bucket);
                }
                Some(total)
            }
        }
    }

    fn destroy(&self) -> region_evict::Result<()> {
        match self {
            Region::Local(r) => r.destroy_region(),
            Region::Partitioned(r) => r.destroy_region(),
        }
    }
}

// =============================================================================
// Workload
// =============================================================================

#[derive(Debug, Default, Serialize)]
struct WorkerTotals {
    puts: u64,
    gets: u64,
    hits: u64,
    destroys: u64,
    errors: u64,
    outcome: EvictionOutcome,
}

impl WorkerTotals {
    fn merge(&mut self, other: &WorkerTotals) {
        self.puts += other.puts;
        self.gets += other.gets;
        self.hits += other.hits;
        self.destroys += other.destroys;
        self.errors += other.errors;
        self.outcome.merge(&other.outcome);
    }
}

#[derive(Debug, Serialize)]
struct Report {
    elapsed_ms: u128,
    entries: usize,
    workload: WorkerTotals,
    statistics: StatsSnapshot,
    disk: Option<DiskRegionSnapshot>,
}

fn run_worker(region: &Region, args: &WorkerArgs, seed: u64) -> WorkerTotals {
    let mut totals = WorkerTotals::default();
    let mut rng = SmallRng::seed_from_u64(seed);
    let payload = "x".repeat(args.value_size);

    for _ in 0..args.ops {
        let roll: f64 = rng.gen();
        let key = format!("key-{}", rng.gen_range(0..args.keys.max(1)));

        let result = if roll < args.destroy_ratio {
            region.remove(key).map(|existed| {
                totals.destroys += u64::from(existed);
            })
        } else if roll < args.destroy_ratio + args.read_ratio {
            region.get(key).map(|value| {
                totals.gets += 1;
                totals.hits += u64::from(value.is_some());
            })
        } else {
            region
                .put(key, EntryValue::text(payload.as_str()))
                .map(|outcome| {
                    totals.puts += 1;
                    totals.outcome.merge(&outcome);
                })
        };

        if let Err(e) = result {
            totals.errors += 1;
            tracing::debug!("Workload operation failed: {}", e);
        }
    }
    totals
}

#[derive(Debug, Clone)]
struct WorkerArgs {
    keys: u64,
    ops: u64,
    value_size: usize,
    read_ratio: f64,
    destroy_ratio: f64,
}

async fn run_workload(args: &Args, region: Region) -> Result<Report> {
    let worker_args = WorkerArgs {
        keys: args.keys,
        ops: args.ops,
        value_size: args.value_size,
        read_ratio: args.read_ratio,
        destroy_ratio: args.destroy_ratio,
    };

    let started = Instant::now();
    let mut handles = Vec::with_capacity(args.threads);
    for worker in 0..args.threads.max(1) {
        let region = region.clone();
        let worker_args = worker_args.clone();
        let seed = 0x9E37_79B9_7F4A_7C15_u64.wrapping_mul(worker as u64 + 1);
        handles.push(tokio::task::spawn_blocking(move || {
            run_worker(&region, &worker_args, seed)
        }));
    }

    let mut totals = WorkerTotals::default();
    for handle in handles {
        let worker = handle.await.context("workload thread panicked")?;
        totals.merge(&worker);
    }
    let elapsed = started.elapsed();

    info!(
        "Workload done in {:?}: {} puts, {} gets ({} hits), {} destroys, {} evicted, {} errors",
        elapsed,
        totals.puts,
        totals.gets,
        totals.hits,
        totals.destroys,
        totals.outcome.evicted,
        totals.errors
    );

    Ok(Report {
        elapsed_ms: elapsed.as_millis(),
        entries: region.len(),
        workload: totals,
        statistics: region.snapshot(),
        disk: region.disk_snapshot(),
    })
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "hyper_util=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, registry: Arc<StatisticsRegistry>) -> Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;

    fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(body.into()));
        *response.status_mut() = status;
        response
    }

    async fn handler(
        req: Request<hyper::body::Incoming>,
        registry: Arc<StatisticsRegistry>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/metrics" => {
                registry.publish();
                match registry.encode_text() {
                    Ok(text) => {
                        let mut response = respond(StatusCode::OK, text);
                        response.headers_mut().insert(
                            CONTENT_TYPE,
                            HeaderValue::from_static("text/plain; version=0.0.4"),
                        );
                        response
                    }
                    Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                }
            }
            "/healthz" | "/livez" | "/readyz" => respond(StatusCode::OK, "ok"),
            _ => respond(StatusCode::NOT_FOUND, "not found"),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid metrics server address {addr}"))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding metrics server to {addr}"))?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("metrics server accept")?;

        let io = TokioIo::new(stream);
        let registry = Arc::clone(&registry);

        tokio::spawn(async move {
            let service = service_fn(move |req| handler(req, Arc::clone(&registry)));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
