//! Leaky-bucket accounting, single and per-key limiters.

mod bucket;
mod clock;
mod limiter;
mod rules;
mod zone;

pub use bucket::{LeakyBucket, Resolution, DEFAULT_MAX_IDLE};
pub use clock::Timer;
pub use limiter::RateLimiter;
pub use rules::{ZoneConfig, ZoneItemConfig, ENV_PREFIX};
pub use zone::ZoneRateLimiter;
