//! Per-key rate limiting zones.

use std::borrow::Borrow;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use quanta::Clock;
use tracing::{debug, trace};

use crate::config::BucketConfig;
use crate::error::{LeakyBucketError, Result};

use super::bucket::{LeakyBucket, Resolution};
use super::clock::Timer;

/// A rate limiter keeping one independent leaky bucket per key.
///
/// New zone items copy the zone's default settings at creation time. Keys
/// that were never registered are not limited at all.
///
/// Items live in a sharded map, so decisions and updates on unrelated keys do
/// not contend on one lock.
pub struct ZoneRateLimiter<K> {
    /// Template for items created by `add_zone_item`
    defaults: RwLock<BucketConfig>,
    /// Buckets indexed by zone key
    items: DashMap<K, LeakyBucket>,
    timer: Timer,
}

impl<K> ZoneRateLimiter<K>
where
    K: Eq + Hash + Debug,
{
    /// Create a zone whose items admit `rate` requests per second by default.
    pub fn new(rate: u32) -> Self {
        Self::from_config(BucketConfig::new(rate))
    }

    /// Create a zone with explicit default settings.
    pub fn from_config(defaults: BucketConfig) -> Self {
        Self {
            defaults: RwLock::new(defaults),
            items: DashMap::new(),
            timer: Timer::new(),
        }
    }

    /// Set the default admitted requests per second.
    pub fn with_rate(mut self, rate: u32) -> Self {
        self.defaults.get_mut().rate = rate;
        self
    }

    /// Set the default burst.
    pub fn with_burst(mut self, burst: u32) -> Self {
        self.defaults.get_mut().burst = burst;
        self
    }

    /// Set the default nodelay mode.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.defaults.get_mut().nodelay = nodelay;
        self
    }

    /// Set the default accounting resolution.
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.defaults.get_mut().resolution = resolution;
        self
    }

    /// Use a specific clock, such as `Clock::mock()` in tests.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.timer = Timer::with_clock(clock);
        self
    }

    /// Replace the default settings.
    ///
    /// Only items created afterwards pick these up.
    pub fn set_defaults(&self, defaults: BucketConfig) {
        *self.defaults.write() = defaults;
    }

    /// Get the default settings.
    pub fn defaults(&self) -> BucketConfig {
        *self.defaults.read()
    }

    /// Register `key` with the current default settings and an empty bucket.
    pub fn add_zone_item(&self, key: K) -> Result<()> {
        let defaults = self.defaults();
        match self.items.entry(key) {
            Entry::Occupied(entry) => {
                debug!(key = ?entry.key(), "Zone item already exists");
                Err(LeakyBucketError::AlreadyExists)
            }
            Entry::Vacant(entry) => {
                debug!(
                    key = ?entry.key(),
                    rate = defaults.rate,
                    burst = defaults.burst,
                    "Creating zone item"
                );
                entry.insert(LeakyBucket::new(defaults));
                Ok(())
            }
        }
    }

    /// Remove `key` and its bucket.
    pub fn delete_zone_item<Q>(&self, key: &Q) -> Result<()>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Debug + ?Sized,
    {
        match self.items.remove(key) {
            Some(_) => {
                debug!(key = ?key, "Deleted zone item");
                Ok(())
            }
            None => Err(LeakyBucketError::NotFound),
        }
    }

    /// Override the settings of `key`, creating it if needed.
    ///
    /// An existing item keeps its accumulated state and uses the new settings
    /// from its next decision on. A new item starts empty and takes the
    /// zone's default resolution.
    pub fn set_zone_item(&self, key: K, rate: u32, burst: u32, nodelay: bool) {
        match self.items.entry(key) {
            Entry::Occupied(entry) => {
                debug!(key = ?entry.key(), rate, burst, nodelay, "Updating zone item");
                entry.get().configure(rate, burst, nodelay);
            }
            Entry::Vacant(entry) => {
                debug!(key = ?entry.key(), rate, burst, nodelay, "Creating customized zone item");
                let config = BucketConfig {
                    rate,
                    burst,
                    nodelay,
                    resolution: self.defaults().resolution,
                };
                entry.insert(LeakyBucket::new(config));
            }
        }
    }

    /// Get the settings of `key`, if registered.
    pub fn item_config<Q>(&self, key: &Q) -> Option<BucketConfig>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.items.get(key).map(|item| item.config())
    }

    /// Whether `key` is registered.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.items.contains_key(key)
    }

    /// Get the number of registered keys.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no keys are registered.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Decide on one request for `key` without waiting.
    ///
    /// Unregistered keys are admitted with no delay.
    pub fn get_delay<Q>(&self, key: &Q) -> Result<Duration>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Debug + ?Sized,
    {
        let Some(item) = self.items.get(key) else {
            trace!(key = ?key, "No zone item, not limited");
            return Ok(Duration::ZERO);
        };

        let delay = item.decide(self.timer.now_nanos())?;
        trace!(key = ?key, delay_us = delay, "Request admitted");
        Ok(Duration::from_micros(delay))
    }

    /// Decide on one request for `key` and block the current thread for the
    /// delay.
    pub fn get<Q>(&self, key: &Q) -> Result<()>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Debug + ?Sized,
    {
        let delay = self.get_delay(key)?;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Ok(())
    }

    /// Decide on one request for `key` and sleep the current task for the
    /// delay.
    pub async fn acquire<Q>(&self, key: &Q) -> Result<()>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Debug + ?Sized,
    {
        let delay = self.get_delay(key)?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

impl<K: Eq + Hash> std::fmt::Debug for ZoneRateLimiter<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoneRateLimiter")
            .field("defaults", &*self.defaults.read())
            .field("items", &self.items.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn mocked(zone: ZoneRateLimiter<String>) -> (ZoneRateLimiter<String>, Arc<quanta::Mock>) {
        let (clock, mock) = Clock::mock();
        (zone.with_clock(clock), mock)
    }

    #[test]
    fn test_zone_creation() {
        let zone: ZoneRateLimiter<String> = ZoneRateLimiter::new(100)
            .with_burst(10)
            .with_nodelay(true)
            .with_resolution(Resolution::MicrosecondX10);

        assert!(zone.is_empty());
        assert_eq!(
            zone.defaults(),
            BucketConfig {
                rate: 100,
                burst: 10,
                nodelay: true,
                resolution: Resolution::MicrosecondX10,
            }
        );
    }

    #[test]
    fn test_add_zone_item_twice_fails() {
        let zone = ZoneRateLimiter::new(100);
        zone.add_zone_item("test.com".to_string()).unwrap();

        let err = zone.add_zone_item("test.com".to_string()).unwrap_err();
        assert!(matches!(err, LeakyBucketError::AlreadyExists));
        assert_eq!(zone.len(), 1);
    }

    #[test]
    fn test_delete_zone_item() {
        let zone = ZoneRateLimiter::new(100);
        zone.add_zone_item("test.com".to_string()).unwrap();

        zone.delete_zone_item("test.com").unwrap();
        assert!(!zone.contains_key("test.com"));

        let err = zone.delete_zone_item("test.com").unwrap_err();
        assert!(matches!(err, LeakyBucketError::NotFound));

        // The key can be registered again after removal.
        zone.add_zone_item("test.com".to_string()).unwrap();
    }

    #[test]
    fn test_unknown_key_is_not_limited() {
        let zone = ZoneRateLimiter::new(0);
        zone.add_zone_item("test.com".to_string()).unwrap();

        for _ in 0..1000 {
            assert_eq!(zone.get_delay("none exist").unwrap(), Duration::ZERO);
            zone.get("none exist").unwrap();
        }
        assert!(zone.get_delay("test.com").is_err());
    }

    #[test]
    fn test_defaults_apply_only_to_new_items() {
        let zone = ZoneRateLimiter::new(100).with_burst(10);
        zone.add_zone_item("old".to_string()).unwrap();

        zone.set_defaults(BucketConfig::new(5));
        zone.add_zone_item("new".to_string()).unwrap();

        assert_eq!(zone.item_config("old").unwrap().rate, 100);
        assert_eq!(zone.item_config("old").unwrap().burst, 10);
        assert_eq!(zone.item_config("new").unwrap(), BucketConfig::new(5));
    }

    #[test]
    fn test_set_zone_item_creates_with_given_config() {
        let (zone, _mock) = mocked(
            ZoneRateLimiter::new(10_000)
                .with_burst(100)
                .with_resolution(Resolution::Microsecond),
        );
        zone.set_zone_item("custom".to_string(), 100, 10, false);

        assert_eq!(
            zone.item_config("custom").unwrap(),
            BucketConfig {
                rate: 100,
                burst: 10,
                nodelay: false,
                resolution: Resolution::Microsecond,
            }
        );
        // Fresh state: the first request is not delayed.
        assert_eq!(zone.get_delay("custom").unwrap(), Duration::ZERO);
        assert_eq!(zone.get_delay("custom").unwrap(), Duration::from_millis(10));
    }

    #[test]
    fn test_set_zone_item_keeps_state() {
        let (zone, _mock) = mocked(ZoneRateLimiter::new(1000).with_burst(10));
        zone.add_zone_item("test.com".to_string()).unwrap();

        zone.get_delay("test.com").unwrap();
        assert_eq!(zone.get_delay("test.com").unwrap(), Duration::from_millis(1));

        zone.set_zone_item("test.com".to_string(), 2000, 2, false);
        // Two queued requests at 2000/s.
        assert_eq!(zone.get_delay("test.com").unwrap(), Duration::from_millis(1));
        assert!(zone.get_delay("test.com").is_err());
    }

    #[test]
    fn test_keys_are_isolated() {
        let (zone, _mock) = mocked(ZoneRateLimiter::new(100).with_burst(2).with_nodelay(true));
        zone.add_zone_item("a".to_string()).unwrap();
        zone.add_zone_item("b".to_string()).unwrap();

        for _ in 0..3 {
            zone.get_delay("a").unwrap();
        }
        assert!(zone.get_delay("a").is_err());

        assert!(zone.get_delay("b").is_ok());
        assert!(zone.get_delay("b").is_ok());
        assert!(zone.get_delay("b").is_ok());
        assert!(zone.get_delay("b").is_err());
    }

    #[test]
    fn test_integer_keys() {
        let zone = ZoneRateLimiter::new(0);
        zone.set_zone_item(2022u32, 0, 0, true);
        assert!(zone.get_delay(&2022).unwrap_err().is_rejected());
        assert!(zone.get_delay(&2023).is_ok());
    }

    #[test]
    fn test_concurrent_distinct_keys() {
        let zone = Arc::new(ZoneRateLimiter::<String>::new(1000).with_burst(1000));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let zone = Arc::clone(&zone);
                std::thread::spawn(move || {
                    let key = format!("key-{}", i);
                    zone.add_zone_item(key.clone()).unwrap();
                    for _ in 0..100 {
                        zone.get_delay(&key).unwrap();
                    }
                    if i % 2 == 0 {
                        zone.delete_zone_item(&key).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(zone.len(), 4);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_delay() {
        tokio::time::pause();
        let (zone, _mock) = mocked(ZoneRateLimiter::new(10).with_burst(1));
        zone.add_zone_item("test.com".to_string()).unwrap();

        let start = tokio::time::Instant::now();
        zone.acquire("test.com").await.unwrap();
        zone.acquire("test.com").await.unwrap();
        zone.acquire("none exist").await.unwrap();
        // The paused timer rounds deadlines up to the next millisecond tick.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(110), "{:?}", elapsed);
    }
}
