//! Time source for bucket decisions.

use std::time::{SystemTime, UNIX_EPOCH};

use quanta::{Clock, Instant};

/// Monotonic clock reporting nanoseconds since the Unix epoch.
///
/// The epoch offset is sampled once from the system clock; afterwards time
/// only moves forward with the underlying `quanta` clock, so wall-clock jumps
/// never reach the buckets.
#[derive(Debug, Clone)]
pub struct Timer {
    clock: Clock,
    /// A fixed point in time to calculate deltas from.
    anchor: Instant,
    /// Nanoseconds since the Unix epoch at `anchor`.
    origin: i64,
}

impl Timer {
    /// Create a timer on the default `quanta` clock.
    pub fn new() -> Self {
        Self::with_clock(Clock::new())
    }

    /// Create a timer on a specific clock, such as `Clock::mock()` in tests.
    pub fn with_clock(clock: Clock) -> Self {
        let anchor = clock.now();
        let origin = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or_default();

        Self {
            clock,
            anchor,
            origin,
        }
    }

    /// Current time in nanoseconds since the Unix epoch.
    pub fn now_nanos(&self) -> i64 {
        let elapsed = self.clock.now().duration_since(self.anchor).as_nanos();
        self.origin
            .saturating_add(i64::try_from(elapsed).unwrap_or(i64::MAX))
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timer_starts_near_wall_clock() {
        let timer = Timer::new();
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as i64;
        let diff = (wall - timer.now_nanos()).abs();
        assert!(diff < Duration::from_secs(1).as_nanos() as i64);
    }

    #[test]
    fn test_timer_follows_mock_clock() {
        let (clock, mock) = Clock::mock();
        let timer = Timer::with_clock(clock);

        let start = timer.now_nanos();
        assert_eq!(timer.now_nanos(), start);

        mock.increment(Duration::from_millis(250));
        assert_eq!(timer.now_nanos() - start, 250_000_000);
    }
}
