//! Storage backends for the route cache.
//!
//! The layer requires a [`CacheBackend`] implementation to persist cached
//! responses. This module ships with:
//! - [`memory::InMemoryBackend`]: a fast, process-local cache backed by [`moka`].
//! - `redis::RedisBackend` *(optional)*: a store shared between processes
//!   when the `redis-backend` crate feature is enabled.
//!
//! Backends own the lifetime of entries: the layer only reads and replaces
//! whole entries and relies on the per-entry TTL for removal.

pub mod memory;
#[cfg(feature = "redis-backend")]
pub mod redis;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::ETAG;
use http::{HeaderName, HeaderValue, Response, StatusCode};
use http_body_util::Full;
use std::time::{Duration, SystemTime};

use crate::error::CacheError;

/// Cached response captured by the layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub status: StatusCode,
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Bytes,
    /// Time the handler produced this response.
    pub last_valid: SystemTime,
    pub etag: String,
}

impl CachedEntry {
    pub fn new(
        status: StatusCode,
        headers: Vec<(String, Vec<u8>)>,
        body: Bytes,
        last_valid: SystemTime,
        etag: String,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            last_valid,
            etag,
        }
    }

    /// Returns the first stored value of `name`, if any.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(stored, _)| stored.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_slice())
    }

    /// Converts the entry back into an `http::Response`.
    ///
    /// Stored headers are replayed verbatim and the entry's ETag is set.
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::from(self.body));
        *response.status_mut() = self.status;

        let headers = response.headers_mut();
        for (name, value) in self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(&value),
            ) {
                headers.append(name, value);
            }
        }
        if let Ok(etag) = HeaderValue::from_str(&self.etag) {
            headers.insert(ETAG, etag);
        }

        response
    }
}

/// A TTL store holding [`CachedEntry`] values.
#[async_trait]
pub trait CacheBackend: Send + Sync + Clone + 'static {
    /// Fetches a cached entry by key.
    ///
    /// Returns `Ok(None)` when the backend does not have a value or the
    /// entry has expired.
    async fn get(&self, key: &str) -> Result<Option<CachedEntry>, CacheError>;

    /// Stores an entry, replacing any previous one, for `ttl`.
    async fn set(&self, key: String, entry: CachedEntry, ttl: Duration) -> Result<(), CacheError>;
}
