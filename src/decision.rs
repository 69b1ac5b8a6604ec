//! Decides whether a stored entry can answer a request.
//!
//! The route's [`AgePolicy`] bounds what a client may ask for: a client
//! `max-age` can shorten the route maximum but never below the route
//! minimum, and a client `min-fresh` is capped at the width of the route
//! window. All arithmetic is in whole seconds.

use std::fmt;
use std::time::SystemTime;

use crate::age::AgePolicy;
use crate::backend::CachedEntry;
use crate::directives::RequestDirectives;

/// What the layer does with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Serve the stored entry; the handler is not invoked.
    Hit,
    /// Run the handler and store its result.
    Miss,
    /// Run the handler without storing its result.
    Bypass,
}

/// Terminal outcome of one request, attached to response extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOutcome {
    Hit,
    Miss,
    Bypass,
    /// The handler failed; nothing was stored or served.
    Error,
}

impl CacheOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
            CacheOutcome::Bypass => "bypass",
            CacheOutcome::Error => "error",
        }
    }
}

impl fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Decision> for CacheOutcome {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Hit => CacheOutcome::Hit,
            Decision::Miss => CacheOutcome::Miss,
            Decision::Bypass => CacheOutcome::Bypass,
        }
    }
}

/// Freshness of an entry as seen by one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freshness {
    pub age: u64,
    pub effective_max_age: u64,
    pub effective_min_fresh: u64,
}

impl Freshness {
    pub fn evaluate(
        last_valid: SystemTime,
        policy: &AgePolicy,
        directives: &RequestDirectives,
        now: SystemTime,
    ) -> Self {
        let age = now
            .duration_since(last_valid)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);

        let effective_max_age = directives
            .max_age
            .map_or(policy.max_secs(), |client| client.min(policy.max_secs()))
            .max(policy.min_secs());

        let effective_min_fresh = directives
            .min_fresh
            .unwrap_or(0)
            .min(policy.window_secs());

        Self {
            age,
            effective_max_age,
            effective_min_fresh,
        }
    }

    /// Seconds of freshness left, zero once expired.
    pub fn remaining(&self) -> u64 {
        self.effective_max_age.saturating_sub(self.age)
    }

    pub fn is_fresh(&self) -> bool {
        self.age <= self.effective_max_age && self.remaining() >= self.effective_min_fresh
    }
}

/// Picks HIT, MISS or BYPASS for a request.
pub fn decide(
    existing: Option<&CachedEntry>,
    policy: &AgePolicy,
    directives: &RequestDirectives,
    now: SystemTime,
) -> Decision {
    if policy.is_disabled() {
        return Decision::Bypass;
    }

    match existing {
        Some(entry) if Freshness::evaluate(entry.last_valid, policy, directives, now).is_fresh() => {
            Decision::Hit
        }
        // `no-store` only forbids the write; a fresh entry is still served.
        _ if directives.no_store => Decision::Bypass,
        _ => Decision::Miss,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::age::Age;
    use bytes::Bytes;
    use http::StatusCode;
    use std::time::Duration;

    fn t0() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn policy(min: u64, max: u64) -> AgePolicy {
        Age::new(Duration::from_secs(min), Duration::from_secs(max))
            .validate()
            .policy
    }

    fn entry_at(last_valid: SystemTime) -> CachedEntry {
        CachedEntry::new(
            StatusCode::OK,
            Vec::new(),
            Bytes::from_static(b"v1"),
            last_valid,
            "\"e\"".to_owned(),
        )
    }

    fn client(max_age: Option<u64>, min_fresh: Option<u64>) -> RequestDirectives {
        RequestDirectives {
            max_age,
            min_fresh,
            no_store: false,
        }
    }

    #[test]
    fn absent_entry_is_a_miss() {
        let decision = decide(None, &policy(0, 60), &RequestDirectives::default(), t0());
        assert_eq!(decision, Decision::Miss);
    }

    #[test]
    fn entry_within_route_window_is_a_hit() {
        let entry = entry_at(t0());
        let now = t0() + Duration::from_secs(10);
        assert_eq!(
            decide(Some(&entry), &policy(0, 60), &RequestDirectives::default(), now),
            Decision::Hit
        );
    }

    #[test]
    fn entry_exactly_at_max_age_is_still_fresh() {
        let entry = entry_at(t0());
        let now = t0() + Duration::from_secs(60);
        assert_eq!(
            decide(Some(&entry), &policy(0, 60), &RequestDirectives::default(), now),
            Decision::Hit
        );
    }

    #[test]
    fn client_max_age_below_age_forces_miss() {
        let entry = entry_at(t0());
        let now = t0() + Duration::from_secs(10);
        assert_eq!(
            decide(Some(&entry), &policy(0, 60), &client(Some(5), None), now),
            Decision::Miss
        );
    }

    #[test]
    fn entry_older_than_route_max_is_a_miss_regardless_of_client() {
        let entry = entry_at(t0());
        let now = t0() + Duration::from_secs(70);
        assert_eq!(
            decide(Some(&entry), &policy(0, 60), &client(Some(3_600), None), now),
            Decision::Miss
        );
    }

    #[test]
    fn route_min_floors_client_max_age() {
        let entry = entry_at(t0());
        let now = t0() + Duration::from_secs(10);
        let freshness = Freshness::evaluate(entry.last_valid, &policy(20, 60), &client(Some(0), None), now);

        assert_eq!(freshness.effective_max_age, 20);
        assert_eq!(
            decide(Some(&entry), &policy(20, 60), &client(Some(0), None), now),
            Decision::Hit
        );
    }

    #[test]
    fn min_fresh_requires_remaining_freshness() {
        let entry = entry_at(t0());
        let now = t0() + Duration::from_secs(50);

        assert_eq!(
            decide(Some(&entry), &policy(0, 60), &client(None, Some(5)), now),
            Decision::Hit
        );
        assert_eq!(
            decide(Some(&entry), &policy(0, 60), &client(None, Some(15)), now),
            Decision::Miss
        );
    }

    #[test]
    fn min_fresh_is_capped_by_route_window() {
        let entry = entry_at(t0());
        let now = t0();
        let freshness =
            Freshness::evaluate(entry.last_valid, &policy(30, 60), &client(None, Some(3_600)), now);

        assert_eq!(freshness.effective_min_fresh, 30);
        assert!(freshness.is_fresh());
    }

    #[test]
    fn disabled_policy_always_bypasses() {
        let entry = entry_at(t0());
        assert_eq!(
            decide(Some(&entry), &policy(0, 0), &RequestDirectives::default(), t0()),
            Decision::Bypass
        );
        assert_eq!(
            decide(None, &policy(0, 0), &RequestDirectives::default(), t0()),
            Decision::Bypass
        );
    }

    #[test]
    fn no_store_serves_fresh_entry() {
        let entry = entry_at(t0());
        let directives = RequestDirectives {
            max_age: Some(0),
            no_store: true,
            ..RequestDirectives::default()
        };
        let now = t0() + Duration::from_secs(10);
        assert_eq!(
            decide(Some(&entry), &policy(30, 60), &directives, now),
            Decision::Hit
        );
    }

    #[test]
    fn no_store_without_usable_entry_bypasses() {
        let directives = RequestDirectives {
            no_store: true,
            ..RequestDirectives::default()
        };
        let stale = entry_at(t0());
        let now = t0() + Duration::from_secs(61);

        assert_eq!(decide(None, &policy(0, 60), &directives, now), Decision::Bypass);
        assert_eq!(
            decide(Some(&stale), &policy(0, 60), &directives, now),
            Decision::Bypass
        );
    }

    #[test]
    fn entry_from_the_future_has_zero_age() {
        let entry = entry_at(t0() + Duration::from_secs(5));
        let freshness =
            Freshness::evaluate(entry.last_valid, &policy(0, 60), &RequestDirectives::default(), t0());
        assert_eq!(freshness.age, 0);
        assert_eq!(freshness.remaining(), 60);
    }

    #[test]
    fn outcome_display_uses_lowercase_names() {
        assert_eq!(CacheOutcome::from(Decision::Hit).to_string(), "hit");
        assert_eq!(CacheOutcome::Error.as_str(), "error");
    }
}
