use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::Parser;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

use leakybucket::{BucketConfig, RateLimiter, Resolution, ZoneConfig, ZoneRateLimiter};

/// Drive a leaky-bucket limiter with concurrent load and report the outcome.
#[derive(Parser, Debug)]
#[command(name = "leakybucket", version, about)]
struct Args {
    /// Zone configuration file (YAML); switches to the zone limiter
    #[arg(long)]
    config: Option<PathBuf>,

    /// Zone key to send requests for, picked at random per request
    /// (defaults to every key in the zone file)
    #[arg(long = "key")]
    keys: Vec<String>,

    /// Admitted requests per second
    #[arg(long, default_value_t = 1000)]
    rate: u32,

    /// Extra requests absorbed before rejecting
    #[arg(long, default_value_t = 10)]
    burst: u32,

    /// Accounting resolution: 1us, 10us, 100us or 1ms
    #[arg(long, default_value = "1ms", value_parser = parse_resolution)]
    resolution: Resolution,

    /// Reject instead of delaying
    #[arg(long)]
    nodelay: bool,

    /// Concurrent callers
    #[arg(long, default_value_t = 10)]
    threads: usize,

    /// Requests sent by each caller
    #[arg(long, default_value_t = 1000)]
    requests: usize,

    /// Use tokio tasks and async acquire instead of blocking threads
    #[arg(long = "async")]
    async_mode: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

fn parse_resolution(value: &str) -> Result<Resolution, String> {
    match value {
        "1us" | "microsecond" => Ok(Resolution::Microsecond),
        "10us" | "microsecond_x10" => Ok(Resolution::MicrosecondX10),
        "100us" | "microsecond_x100" => Ok(Resolution::MicrosecondX100),
        "1ms" | "millisecond" => Ok(Resolution::Millisecond),
        other => Err(format!("unsupported resolution: {}", other)),
    }
}

/// What the load is sent to.
enum Target {
    Single(RateLimiter),
    Zone {
        zone: ZoneRateLimiter<String>,
        keys: Vec<String>,
    },
}

impl Target {
    fn pick_key(keys: &[String]) -> &str {
        keys.choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or_default()
    }

    fn get(&self) -> leakybucket::Result<()> {
        match self {
            Target::Single(limiter) => limiter.get(),
            Target::Zone { zone, keys } => zone.get(Self::pick_key(keys)),
        }
    }

    async fn acquire(&self) -> leakybucket::Result<()> {
        match self {
            Target::Single(limiter) => limiter.acquire().await,
            Target::Zone { zone, keys } => {
                let key = Self::pick_key(keys);
                zone.acquire(key).await
            }
        }
    }

    fn mode(&self) -> &'static str {
        match self {
            Target::Single(_) => "single",
            Target::Zone { .. } => "zone",
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    admitted: AtomicU64,
    rejected: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: leakybucket::Result<()>) {
        match outcome {
            Ok(()) => self.admitted.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.rejected.fetch_add(1, Ordering::Relaxed),
        };
    }
}

#[derive(Debug, Serialize)]
struct Report {
    mode: &'static str,
    callers: usize,
    requests: u64,
    admitted: u64,
    rejected: u64,
    elapsed_ms: u128,
    admitted_per_second: f64,
}

fn build_target(args: &Args) -> anyhow::Result<Target> {
    let Some(path) = &args.config else {
        let config = BucketConfig {
            rate: args.rate,
            burst: args.burst,
            nodelay: args.nodelay,
            resolution: args.resolution,
        };
        info!(rate = config.rate, burst = config.burst, nodelay = config.nodelay, "Using single limiter");
        return Ok(Target::Single(RateLimiter::from_config(config)));
    };

    let config = ZoneConfig::load(path)
        .with_context(|| format!("failed to load zone config {}", path.display()))?;
    let zone = config.build()?;

    let keys = if args.keys.is_empty() {
        config.items.iter().map(|item| item.key.clone()).collect()
    } else {
        args.keys.clone()
    };
    if keys.is_empty() {
        bail!("zone mode needs at least one --key or an item in the zone file");
    }

    info!(items = zone.len(), keys = ?keys, "Using zone limiter");
    Ok(Target::Zone { zone, keys })
}

fn run_threads(target: &Target, counters: &Counters, callers: usize, requests: usize) {
    std::thread::scope(|scope| {
        for caller in 0..callers {
            scope.spawn(move || {
                for _ in 0..requests {
                    counters.record(target.get());
                }
                debug!(caller, "Caller finished");
            });
        }
    });
}

async fn run_tasks(target: Arc<Target>, counters: Arc<Counters>, callers: usize, requests: usize) {
    let handles = (0..callers).map(|caller| {
        let target = Arc::clone(&target);
        let counters = Arc::clone(&counters);
        tokio::spawn(async move {
            for _ in 0..requests {
                counters.record(target.acquire().await);
            }
            debug!(caller, "Caller finished");
        })
    });

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Caller task failed");
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let target = Arc::new(build_target(&args)?);
    let counters = Arc::new(Counters::default());

    info!(
        callers = args.threads,
        requests = args.requests,
        async_mode = args.async_mode,
        "Starting load"
    );
    let start = Instant::now();

    if args.async_mode {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?
            .block_on(run_tasks(
                Arc::clone(&target),
                Arc::clone(&counters),
                args.threads,
                args.requests,
            ));
    } else {
        run_threads(&target, &counters, args.threads, args.requests);
    }

    let elapsed = start.elapsed();
    let admitted = counters.admitted.load(Ordering::Relaxed);
    let rejected = counters.rejected.load(Ordering::Relaxed);
    let report = Report {
        mode: target.mode(),
        callers: args.threads,
        requests: admitted + rejected,
        admitted,
        rejected,
        elapsed_ms: elapsed.as_millis(),
        admitted_per_second: admitted as f64 / elapsed.max(Duration::from_millis(1)).as_secs_f64(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        info!(
            mode = report.mode,
            admitted = report.admitted,
            rejected = report.rejected,
            elapsed_ms = report.elapsed_ms,
            admitted_per_second = report.admitted_per_second,
            "Load finished"
        );
    }

    Ok(())
}
