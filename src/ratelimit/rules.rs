//! Declarative zone configuration.
//!
//! A zone file names the default bucket settings and the keys to register,
//! optionally overriding rate, burst or nodelay per key:
//!
//! ```yaml
//! defaults:
//!   rate: 10000
//!   burst: 100
//!   resolution: microsecond
//! items:
//!   - key: test.com
//!   - key: custom
//!     rate: 100
//!     burst: 10
//! ```

use std::path::Path;

use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::zone::ZoneRateLimiter;
use crate::config::BucketConfig;
use crate::error::{LeakyBucketError, Result};

/// Prefix of environment variables overriding a zone file.
pub const ENV_PREFIX: &str = "LEAKYBUCKET";

/// A zone: default settings plus the keys registered at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Settings copied into items without overrides
    #[serde(default)]
    pub defaults: BucketConfig,
    /// Keys to register
    #[serde(default)]
    pub items: Vec<ZoneItemConfig>,
}

/// One registered key.
///
/// Any field left out falls back to the zone defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneItemConfig {
    pub key: String,
    #[serde(default)]
    pub rate: Option<u32>,
    #[serde(default)]
    pub burst: Option<u32>,
    #[serde(default)]
    pub nodelay: Option<bool>,
}

impl ZoneItemConfig {
    /// Whether this item overrides any default.
    pub fn is_customized(&self) -> bool {
        self.rate.is_some() || self.burst.is_some() || self.nodelay.is_some()
    }
}

impl ZoneConfig {
    /// Load a zone from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading zone configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a zone from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| LeakyBucketError::Config(format!("Failed to parse zone config: {}", e)))
    }

    /// Load a zone from a YAML file, layered with `LEAKYBUCKET__`-prefixed
    /// environment variables such as `LEAKYBUCKET__DEFAULTS__RATE=500`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading zone configuration with environment overrides");

        let config = Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Create a zone limiter with every item registered.
    ///
    /// Items without overrides take the defaults; a plain key listed twice is
    /// an [`LeakyBucketError::AlreadyExists`] error, while customized items
    /// are upserts and the last one wins.
    pub fn build(&self) -> Result<ZoneRateLimiter<String>> {
        let zone = ZoneRateLimiter::from_config(self.defaults);

        for item in &self.items {
            if item.is_customized() {
                zone.set_zone_item(
                    item.key.clone(),
                    item.rate.unwrap_or(self.defaults.rate),
                    item.burst.unwrap_or(self.defaults.burst),
                    item.nodelay.unwrap_or(self.defaults.nodelay),
                );
            } else {
                zone.add_zone_item(item.key.clone())?;
            }
        }

        info!(items = zone.len(), rate = self.defaults.rate, "Zone built");
        Ok(zone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::Resolution;

    const ZONE_YAML: &str = r#"
defaults:
  rate: 10000
  burst: 100
  resolution: microsecond
items:
  - key: test.com
  - key: custom
    rate: 100
    burst: 10
    nodelay: false
  - key: strict
    nodelay: true
"#;

    #[test]
    fn test_parse_zone_config() {
        let config = ZoneConfig::from_yaml(ZONE_YAML).unwrap();

        assert_eq!(config.defaults.rate, 10000);
        assert_eq!(config.defaults.burst, 100);
        assert!(!config.defaults.nodelay);
        assert_eq!(config.defaults.resolution, Resolution::Microsecond);
        assert_eq!(config.items.len(), 3);
        assert!(!config.items[0].is_customized());
        assert_eq!(config.items[1].rate, Some(100));
        assert!(config.items[2].is_customized());
    }

    #[test]
    fn test_parse_empty_config() {
        let config = ZoneConfig::from_yaml("{}").unwrap();
        assert_eq!(config, ZoneConfig::default());
    }

    #[test]
    fn test_parse_invalid_resolution() {
        let yaml = r#"
defaults:
  rate: 10
  resolution: nanosecond
"#;
        let err = ZoneConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, LeakyBucketError::Config(_)));
    }

    #[test]
    fn test_build_zone() {
        let zone = ZoneConfig::from_yaml(ZONE_YAML).unwrap().build().unwrap();

        assert_eq!(zone.len(), 3);
        assert_eq!(zone.item_config("test.com").unwrap().rate, 10000);

        let custom = zone.item_config("custom").unwrap();
        assert_eq!(custom.rate, 100);
        assert_eq!(custom.burst, 10);
        assert_eq!(custom.resolution, Resolution::Microsecond);

        let strict = zone.item_config("strict").unwrap();
        assert_eq!(strict.rate, 10000);
        assert_eq!(strict.burst, 100);
        assert!(strict.nodelay);

        assert!(!zone.contains_key("none exist"));
    }

    #[test]
    fn test_build_duplicate_plain_key_fails() {
        let yaml = r#"
defaults:
  rate: 10
items:
  - key: a
  - key: a
"#;
        let err = ZoneConfig::from_yaml(yaml).unwrap().build().unwrap_err();
        assert!(matches!(err, LeakyBucketError::AlreadyExists));
    }

    #[test]
    fn test_from_file_missing() {
        let err = ZoneConfig::from_file("/nonexistent/zone.yaml").unwrap_err();
        assert!(matches!(err, LeakyBucketError::Io(_)));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("leakybucket-zone-{}.yaml", std::process::id()));
        std::fs::write(&path, ZONE_YAML).unwrap();

        let config = ZoneConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.defaults.rate, 10000);
        assert_eq!(config.items.len(), 3);
        assert_eq!(config.items[1].burst, Some(10));
    }
}
