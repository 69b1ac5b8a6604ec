//! Serializable route cache configuration.
//!
//! ```
//! use tower_route_cache::config::RouteCacheConfig;
//!
//! let config: RouteCacheConfig =
//!     serde_json::from_str(r#"{"min_age": "5s", "max_age": "1m"}"#).unwrap();
//! assert_eq!(config.age().max.as_secs(), 60);
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::age::Age;

/// Options recognized for a cached route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteCacheConfig {
    /// Floor below which client freshness requests cannot force a refresh.
    #[serde(with = "humantime_serde")]
    pub min_age: Duration,
    /// Oldest entry that may be served; also the store TTL.
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
    /// Status codes whose responses are stored. `None` keeps the default set.
    pub statuses: Option<BTreeSet<u16>>,
    /// Request header names that become part of the cache key.
    pub vary_headers: Vec<String>,
    /// Collapse concurrent misses for the same key into one handler call.
    pub single_flight: bool,
}

impl Default for RouteCacheConfig {
    fn default() -> Self {
        Self {
            min_age: Duration::ZERO,
            max_age: Duration::ZERO,
            statuses: None,
            vary_headers: Vec::new(),
            single_flight: false,
        }
    }
}

impl RouteCacheConfig {
    pub fn age(&self) -> Age {
        Age::new(self.min_age, self.max_age)
    }
}
