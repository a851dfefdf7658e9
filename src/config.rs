//! Configuration values shared by every leaky bucket.

use serde::{Deserialize, Serialize};

use crate::ratelimit::Resolution;

/// Settings for one leaky bucket.
///
/// The zone limiter keeps one of these as the template for new zone items;
/// the single limiter keeps one for its only bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Admitted requests per second. Zero rejects everything.
    #[serde(default)]
    pub rate: u32,

    /// Extra requests absorbed above the steady rate before rejecting
    #[serde(default)]
    pub burst: u32,

    /// Never ask callers to wait: admit immediately or reject
    #[serde(default)]
    pub nodelay: bool,

    /// Time quantization used for the internal accounting
    #[serde(default)]
    pub resolution: Resolution,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

impl BucketConfig {
    /// Settings for `rate` requests per second with no burst, delays enabled
    /// and millisecond resolution.
    pub fn new(rate: u32) -> Self {
        Self {
            rate,
            burst: 0,
            nodelay: false,
            resolution: Resolution::default(),
        }
    }
}
