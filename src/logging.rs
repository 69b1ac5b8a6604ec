//! Structured cache events.
//!
//! When enabled, every request handled by the layer emits one JSON event
//! (and stores emit another) through `tracing` under the
//! `tower_route_cache::events` target. Keys can be hashed so that URLs with
//! personal data do not end up in logs.

use std::time::{Duration, SystemTime};

use http::{Method, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::decision::CacheOutcome;
use crate::request_id::RequestId;

/// Configuration for structured cache events.
#[derive(Debug, Clone)]
pub struct CacheEventConfig {
    pub enabled: bool,

    /// Sample rate (1.0 = all requests, 0.1 = 10%)
    pub sample_rate: f64,

    /// Hash cache keys before logging them.
    pub hash_keys: bool,
}

impl Default for CacheEventConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_rate: 1.0,
            hash_keys: true,
        }
    }
}

impl CacheEventConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the sample rate, clamped to `0.0..=1.0`.
    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_hash_keys(mut self, hash: bool) -> Self {
        self.hash_keys = hash;
        self
    }

    /// Checks if this request should be logged based on sampling rate.
    pub fn should_sample(&self) -> bool {
        if !self.enabled || self.sample_rate <= 0.0 {
            return false;
        }
        if self.sample_rate >= 1.0 {
            return true;
        }
        use std::collections::hash_map::RandomState;
        use std::hash::BuildHasher;

        let random = (RandomState::new().hash_one(SystemTime::now()) as f64) / (u64::MAX as f64);
        random < self.sample_rate
    }
}

/// Kinds of cache events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheEventType {
    Hit,
    /// A hit answered with `304 Not Modified`.
    NotModified,
    Miss,
    Bypass,
    /// The handler failed.
    Error,
    /// A fresh entry was written to the store.
    Store,
    StoreFailed,
    LookupFailed,
}

impl From<CacheOutcome> for CacheEventType {
    fn from(outcome: CacheOutcome) -> Self {
        match outcome {
            CacheOutcome::Hit => CacheEventType::Hit,
            CacheOutcome::Miss => CacheEventType::Miss,
            CacheOutcome::Bypass => CacheEventType::Bypass,
            CacheOutcome::Error => CacheEventType::Error,
        }
    }
}

/// One structured cache event.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    pub timestamp: SystemTime,
    pub event_type: CacheEventType,
    pub request_id: RequestId,
    pub key: Option<String>,
    pub method: Option<Method>,
    pub uri: Option<Uri>,
    pub status: Option<StatusCode>,
    pub etag: Option<String>,
    /// Entry age in seconds at decision time.
    pub age_seconds: Option<u64>,
    pub latency_us: Option<u64>,
    pub size_bytes: Option<usize>,
    pub ttl_seconds: Option<u64>,
}

impl CacheEvent {
    pub fn new(event_type: CacheEventType, request_id: RequestId) -> Self {
        Self {
            timestamp: SystemTime::now(),
            event_type,
            request_id,
            key: None,
            method: None,
            uri: None,
            status: None,
            etag: None,
            age_seconds: None,
            latency_us: None,
            size_bytes: None,
            ttl_seconds: None,
        }
    }

    pub fn with_key(mut self, key: Option<String>) -> Self {
        self.key = key;
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_uri(mut self, uri: Uri) -> Self {
        self.uri = Some(uri);
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_age(mut self, age_seconds: u64) -> Self {
        self.age_seconds = Some(age_seconds);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_us = Some(latency.as_micros() as u64);
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size_bytes = Some(size);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_seconds = Some(ttl.as_secs());
        self
    }

    /// Renders the event as the JSON document that gets logged.
    pub fn to_json(&self, config: &CacheEventConfig) -> serde_json::Value {
        let key = self.key.as_ref().map(|key| {
            if config.hash_keys {
                hash_key(key)
            } else {
                key.clone()
            }
        });

        let timestamp = chrono::DateTime::<chrono::Utc>::from(self.timestamp)
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

        json!({
            "timestamp": timestamp,
            "event": self.event_type,
            "request_id": self.request_id.as_str(),
            "key": key,
            "method": self.method.as_ref().map(|m| m.as_str()),
            "uri": self.uri.as_ref().map(|u| u.to_string()),
            "status": self.status.as_ref().map(|s| s.as_u16()),
            "etag": self.etag,
            "age_seconds": self.age_seconds,
            "latency_us": self.latency_us,
            "size_bytes": self.size_bytes,
            "ttl_seconds": self.ttl_seconds,
        })
    }

    /// Logs this event using the provided configuration.
    pub fn log(&self, config: &CacheEventConfig) {
        if !config.should_sample() {
            return;
        }

        let event = self.to_json(config);

        #[cfg(feature = "tracing")]
        tracing::info!(target: "tower_route_cache::events", event = %event);

        #[cfg(not(feature = "tracing"))]
        let _ = event;
    }
}

/// Hashes a cache key using SHA-256.
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}
