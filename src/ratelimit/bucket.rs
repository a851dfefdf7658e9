//! Leaky-bucket accounting cell.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::BucketConfig;
use crate::error::{LeakyBucketError, Result};

const NANOS_PER_SECOND: i64 = 1_000_000_000;
const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Default cap on the drain computed for an idle bucket.
pub const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(3600);

/// Time quantization used for bucket accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// 1 microsecond
    Microsecond,
    /// 10 microseconds
    MicrosecondX10,
    /// 100 microseconds
    MicrosecondX100,
    /// 1 millisecond
    #[default]
    Millisecond,
}

impl Resolution {
    /// Get the duration of one resolution unit.
    pub fn duration(&self) -> Duration {
        match self {
            Resolution::Microsecond => Duration::from_micros(1),
            Resolution::MicrosecondX10 => Duration::from_micros(10),
            Resolution::MicrosecondX100 => Duration::from_micros(100),
            Resolution::Millisecond => Duration::from_millis(1),
        }
    }

    /// Nanoseconds in one resolution unit.
    pub fn as_nanos(&self) -> i64 {
        match self {
            Resolution::Microsecond => 1_000,
            Resolution::MicrosecondX10 => 10_000,
            Resolution::MicrosecondX100 => 100_000,
            Resolution::Millisecond => 1_000_000,
        }
    }

    /// Resolution units per second.
    pub fn factor(&self) -> i64 {
        NANOS_PER_SECOND / self.as_nanos()
    }
}

/// State and settings of one leaky bucket.
///
/// `excess` is the fill level above the steady drain, in resolution-scaled
/// units: every admitted request adds one second's worth of resolution units
/// and the bucket drains `rate` units per elapsed resolution unit. Updates go
/// through a compare-and-swap loop on `excess`.
///
/// `last` is written with a plain store after the swap succeeds, so a
/// concurrent decision can briefly pair a fresh `excess` with a stale `last`.
/// The window is bounded by scheduler latency and only shifts the drain of
/// that one decision.
///
/// Settings are atomics so a live override can race a decision without
/// tearing; such a decision sees either the old or the new value of each
/// field.
#[derive(Debug)]
pub struct LeakyBucket {
    rate: AtomicU32,
    burst: AtomicU32,
    nodelay: AtomicBool,
    resolution: Resolution,
    max_idle: Duration,
    excess: AtomicI64,
    last: AtomicI64,
}

impl LeakyBucket {
    /// Create a bucket with fresh state.
    pub fn new(config: BucketConfig) -> Self {
        Self {
            rate: AtomicU32::new(config.rate),
            burst: AtomicU32::new(config.burst),
            nodelay: AtomicBool::new(config.nodelay),
            resolution: config.resolution,
            max_idle: DEFAULT_MAX_IDLE,
            excess: AtomicI64::new(0),
            last: AtomicI64::new(0),
        }
    }

    /// Cap the drain applied after a long idle period.
    pub fn with_max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle = max_idle;
        self
    }

    pub(crate) fn set_resolution(&mut self, resolution: Resolution) {
        self.resolution = resolution;
    }

    /// Replace rate, burst and nodelay, keeping the accumulated state.
    pub fn configure(&self, rate: u32, burst: u32, nodelay: bool) {
        self.rate.store(rate, Ordering::Relaxed);
        self.burst.store(burst, Ordering::Relaxed);
        self.nodelay.store(nodelay, Ordering::Relaxed);
    }

    /// Snapshot of the current settings.
    pub fn config(&self) -> BucketConfig {
        BucketConfig {
            rate: self.rate.load(Ordering::Relaxed),
            burst: self.burst.load(Ordering::Relaxed),
            nodelay: self.nodelay.load(Ordering::Relaxed),
            resolution: self.resolution,
        }
    }

    /// Current fill level in resolution-scaled units.
    pub fn excess(&self) -> i64 {
        self.excess.load(Ordering::Acquire)
    }

    /// Resolution-quantized timestamp of the last admitted request.
    pub fn last(&self) -> i64 {
        self.last.load(Ordering::Acquire)
    }

    /// Decide on one request arriving at `now_nanos` (nanoseconds since the
    /// Unix epoch).
    ///
    /// Returns the delay in microseconds the caller should wait, or
    /// [`LeakyBucketError::Rejected`]. A rejection leaves the state untouched.
    pub fn decide(&self, now_nanos: i64) -> Result<u64> {
        let rate = i64::from(self.rate.load(Ordering::Relaxed));
        if rate == 0 {
            trace!("Rate is zero, rejecting");
            return Err(LeakyBucketError::Rejected);
        }

        let resolution = self.resolution.as_nanos();
        let factor = self.resolution.factor();
        let scaled_rate = rate * factor;
        let scaled_burst = i64::from(self.burst.load(Ordering::Relaxed)) * factor;

        let now = now_nanos / resolution;
        let max_elapsed = i64::try_from(self.max_idle.as_nanos())
            .unwrap_or(i64::MAX)
            / resolution;

        let excess = loop {
            let last = self.last.load(Ordering::Acquire);
            let current = self.excess.load(Ordering::Acquire);

            // A negative elapsed refills the bucket; it is drained again once a
            // later decision moves `last` forward.
            let elapsed = now.saturating_sub(last).min(max_elapsed);
            let next = current
                .saturating_sub(rate.saturating_mul(elapsed))
                .saturating_add(factor)
                .max(0);

            if next > scaled_burst {
                trace!(excess = next, burst = scaled_burst, "Bucket over capacity");
                return Err(LeakyBucketError::Rejected);
            }

            if self
                .excess
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.last.store(now, Ordering::Release);
                break next;
            }
        };

        if self.nodelay.load(Ordering::Relaxed) {
            return Ok(0);
        }

        // Truncated, not rounded.
        let delay_in_seconds = excess as f64 / scaled_rate as f64;
        Ok((delay_in_seconds * MICROS_PER_SECOND) as u64)
    }
}
