//! Leakybucket - Lock-free Leaky-Bucket Rate Limiting
//!
//! This crate implements a leaky-bucket traffic shaper. Every request is
//! either admitted immediately, admitted after a computed delay, or rejected.
//! A single [`RateLimiter`] shapes one stream; a [`ZoneRateLimiter`] keeps an
//! independent bucket per key under one set of default settings.
//!
//! ```no_run
//! use leakybucket::{RateLimiter, Resolution};
//!
//! let limiter = RateLimiter::new(1000)
//!     .with_burst(10)
//!     .with_resolution(Resolution::Microsecond);
//!
//! for _ in 0..10 {
//!     if limiter.get().is_err() {
//!         // over capacity
//!     }
//! }
//! ```

pub mod config;
pub mod error;
pub mod ratelimit;

pub use crate::config::BucketConfig;
pub use error::{LeakyBucketError, Result};
pub use ratelimit::{LeakyBucket, RateLimiter, Resolution, Timer, ZoneConfig, ZoneRateLimiter};
