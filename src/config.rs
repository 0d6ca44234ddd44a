//! Engine configuration
//!
//! Every value has a default matching the production blog deployment, so an
//! empty YAML document is a valid configuration.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::PolicyKind;
use crate::error::{Error, Result};

/// Ranking name for the hot posts leaderboard
pub const HOT_POSTS: &str = "hot_posts";

/// Ranking name for the popular tags leaderboard
pub const POPULAR_TAGS: &str = "popular_tags_ranking";

/// Per-region cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionSettings {
    /// Maximum number of L1 entries
    pub l1_capacity: usize,
    /// L1 time-to-live (expire after write)
    #[serde(with = "duration_secs")]
    pub l1_ttl: Duration,
    /// L2 time-to-live
    #[serde(with = "duration_secs")]
    pub l2_ttl: Duration,
    /// Default deadline for loader calls
    #[serde(with = "duration_millis")]
    pub load_timeout: Duration,
    /// Deadline for each shared store call
    #[serde(with = "duration_millis")]
    pub store_timeout: Duration,
    /// L1 eviction policy
    pub eviction: PolicyKind,
}

impl Default for RegionSettings {
    fn default() -> Self {
        Self {
            l1_capacity: 5000,
            l1_ttl: Duration::from_secs(120),
            l2_ttl: Duration::from_secs(3600),
            load_timeout: Duration::from_secs(5),
            store_timeout: Duration::from_millis(1000),
            eviction: PolicyKind::LruK,
        }
    }
}

/// Leaderboard configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingSettings {
    /// Sliding expiry refreshed on every increment
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
}

impl Default for RankingSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(6 * 3600),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Settings for regions without an explicit entry
    pub defaults: RegionSettings,
    /// Region-specific settings
    pub regions: HashMap<String, RegionSettings>,
    /// Leaderboard settings by ranking name
    pub rankings: HashMap<String, RankingSettings>,
    /// TTL of raw counters
    #[serde(with = "duration_secs")]
    pub counter_ttl: Duration,
    /// Well-known keys reported by the status query
    pub status_keys: Vec<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            defaults: RegionSettings::default(),
            regions: HashMap::new(),
            rankings: HashMap::new(),
            counter_ttl: Duration::from_secs(30 * 24 * 3600),
            status_keys: vec![
                HOT_POSTS.to_string(),
                POPULAR_TAGS.to_string(),
                "stats:total_users".to_string(),
                "stats:total_admins".to_string(),
            ],
        }
    }
}

impl CacheSettings {
    /// Parse settings from a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings: CacheSettings = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    /// Settings for a region, falling back to the defaults
    pub fn region(&self, name: &str) -> RegionSettings {
        self.regions
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }

    /// Settings for a leaderboard, falling back to the default TTL
    pub fn ranking(&self, name: &str) -> RankingSettings {
        self.rankings.get(name).cloned().unwrap_or_default()
    }

    /// Reject settings the engine cannot honor
    pub fn validate(&self) -> Result<()> {
        let all = std::iter::once(("defaults", &self.defaults))
            .chain(self.regions.iter().map(|(k, v)| (k.as_str(), v)));
        for (name, region) in all {
            if region.l1_capacity == 0 {
                return Err(Error::Config(format!(
                    "region {}: l1_capacity must be greater than zero",
                    name
                )));
            }
            if region.l1_ttl.is_zero() || region.l2_ttl.is_zero() {
                return Err(Error::Config(format!(
                    "region {}: TTLs must be non-zero",
                    name
                )));
            }
            if name.contains("::") {
                return Err(Error::Config(format!(
                    "region name {} must not contain '::'",
                    name
                )));
            }
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_defaults() {
        let settings = CacheSettings::default();
        assert_eq!(settings.defaults.l1_capacity, 5000);
        assert_eq!(settings.defaults.l1_ttl, Duration::from_secs(120));
        assert_eq!(settings.defaults.l2_ttl, Duration::from_secs(3600));
        assert_eq!(settings.ranking(HOT_POSTS).ttl, Duration::from_secs(21600));
        assert_eq!(settings.counter_ttl, Duration::from_secs(2_592_000));
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let settings = CacheSettings::from_yaml("{}").unwrap();
        assert_eq!(settings, CacheSettings::default());
    }

    #[test]
    fn test_region_override() {
        let yaml = r#"
defaults:
  l1_capacity: 100
regions:
  searchResults:
    l1_capacity: 50
    l1_ttl: 30
    l2_ttl: 600
    eviction: lru
rankings:
  popular_tags_ranking:
    ttl: 60
"#;
        let settings = CacheSettings::from_yaml(yaml).unwrap();
        assert_eq!(settings.region("posts").l1_capacity, 100);

        let search = settings.region("searchResults");
        assert_eq!(search.l1_capacity, 50);
        assert_eq!(search.l1_ttl, Duration::from_secs(30));
        assert_eq!(search.eviction, PolicyKind::Lru);
        // Unspecified fields take the built-in defaults
        assert_eq!(search.store_timeout, Duration::from_millis(1000));

        assert_eq!(settings.ranking(POPULAR_TAGS).ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let yaml = "defaults:\n  l1_capacity: 0\n";
        assert_matches!(CacheSettings::from_yaml(yaml), Err(Error::Config(_)));
    }

    #[test]
    fn test_validation_rejects_separator_in_region_name() {
        let yaml = "regions:\n  \"bad::name\": {}\n";
        assert_matches!(CacheSettings::from_yaml(yaml), Err(Error::Config(_)));
    }

    #[test]
    fn test_invalid_yaml() {
        assert_matches!(
            CacheSettings::from_yaml("defaults: [1, 2"),
            Err(Error::Yaml(_))
        );
    }
}
