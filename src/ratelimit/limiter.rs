//! Single-stream rate limiter.

use std::time::Duration;

use quanta::Clock;
use tracing::trace;

use crate::config::BucketConfig;
use crate::error::Result;

use super::bucket::{LeakyBucket, Resolution};
use super::clock::Timer;

/// A rate limiter shaping one stream of requests through one leaky bucket.
///
/// This struct is thread-safe and can be shared across threads and tasks
/// behind an `Arc`.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: LeakyBucket,
    timer: Timer,
}

impl RateLimiter {
    /// Create a rate limiter admitting `rate` requests per second, with no
    /// burst, delays enabled and millisecond resolution.
    pub fn new(rate: u32) -> Self {
        Self::from_config(BucketConfig::new(rate))
    }

    /// Create a rate limiter from explicit settings.
    pub fn from_config(config: BucketConfig) -> Self {
        Self {
            bucket: LeakyBucket::new(config),
            timer: Timer::new(),
        }
    }

    /// Set the admitted requests per second.
    pub fn with_rate(self, rate: u32) -> Self {
        let config = self.bucket.config();
        self.bucket.configure(rate, config.burst, config.nodelay);
        self
    }

    /// Set how many extra requests are absorbed before rejecting.
    pub fn with_burst(self, burst: u32) -> Self {
        let config = self.bucket.config();
        self.bucket.configure(config.rate, burst, config.nodelay);
        self
    }

    /// Reject instead of delaying when set.
    pub fn with_nodelay(self, nodelay: bool) -> Self {
        let config = self.bucket.config();
        self.bucket.configure(config.rate, config.burst, nodelay);
        self
    }

    /// Set the accounting resolution.
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.bucket.set_resolution(resolution);
        self
    }

    /// Cap the drain applied after a long idle period (one hour by default).
    pub fn with_max_idle(mut self, max_idle: Duration) -> Self {
        self.bucket = self.bucket.with_max_idle(max_idle);
        self
    }

    /// Use a specific clock, such as `Clock::mock()` in tests.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.timer = Timer::with_clock(clock);
        self
    }

    /// Get the current settings.
    pub fn config(&self) -> BucketConfig {
        self.bucket.config()
    }

    /// Decide on one request without waiting.
    ///
    /// Returns how long the caller should wait before proceeding; the
    /// capacity is consumed either way.
    pub fn get_delay(&self) -> Result<Duration> {
        let delay = self.bucket.decide(self.timer.now_nanos())?;
        trace!(delay_us = delay, "Request admitted");
        Ok(Duration::from_micros(delay))
    }

    /// Decide on one request and block the current thread for the delay.
    ///
    /// A rejection returns immediately.
    pub fn get(&self) -> Result<()> {
        let delay = self.get_delay()?;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Ok(())
    }

    /// Decide on one request and sleep the current task for the delay.
    ///
    /// Dropping the future mid-wait does not give the capacity back.
    pub async fn acquire(&self) -> Result<()> {
        let delay = self.get_delay()?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}
