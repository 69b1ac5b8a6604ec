//! Route freshness bounds.
//!
//! An [`Age`] is what users configure: a minimum and a maximum duration.
//! Validating it produces the [`AgePolicy`] the decision engine works with,
//! expressed in whole seconds, together with every error and warning found.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigWarning};

/// Life-time boundaries for cached responses of a route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Age {
    /// Floor for client controlled freshness. A client sending `max-age=0`
    /// on every request still gets cached responses younger than this.
    #[serde(default, with = "humantime_serde")]
    pub min: Duration,
    /// Maximum age of a served response. Also used as the store TTL.
    #[serde(default, with = "humantime_serde")]
    pub max: Duration,
}

/// Outcome of [`Age::validate`].
#[derive(Debug, Clone)]
pub struct Validated {
    pub policy: AgePolicy,
    pub errors: Vec<ConfigError>,
    pub warnings: Vec<ConfigWarning>,
}

impl Age {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    /// Checks the bounds and normalizes them to seconds.
    ///
    /// Problems are accumulated rather than returned one at a time.
    pub fn validate(&self) -> Validated {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.min > self.max {
            errors.push(ConfigError::MinAgeExceedsMaxAge {
                min: self.min,
                max: self.max,
            });
        }

        let policy = self.to_policy();
        if policy.is_disabled() {
            #[cfg(feature = "tracing")]
            tracing::warn!(min = ?self.min, max = ?self.max, "route cache disabled because both age bounds are under one second");
            warnings.push(ConfigWarning::CachingDisabled);
        }

        Validated {
            policy,
            errors,
            warnings,
        }
    }

    fn to_policy(self) -> AgePolicy {
        AgePolicy {
            min_secs: self.min.as_secs(),
            max_secs: self.max.as_secs(),
        }
    }
}

/// Normalized freshness bounds in whole seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgePolicy {
    min_secs: u64,
    max_secs: u64,
}

impl AgePolicy {
    pub fn min_secs(&self) -> u64 {
        self.min_secs
    }

    pub fn max_secs(&self) -> u64 {
        self.max_secs
    }

    /// A policy whose bounds are both zero never stores anything.
    pub fn is_disabled(&self) -> bool {
        self.min_secs == 0 && self.max_secs == 0
    }

    /// Upper limit of the `min-fresh` a client may demand.
    pub fn window_secs(&self) -> u64 {
        self.max_secs.saturating_sub(self.min_secs)
    }

    /// TTL handed to the backing store.
    pub fn max_ttl(&self) -> Duration {
        Duration::from_secs(self.max_secs)
    }
}
