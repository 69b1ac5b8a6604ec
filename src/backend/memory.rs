use async_trait::async_trait;
use moka::future::Cache;
use std::time::{Duration, SystemTime};

use super::{CacheBackend, CachedEntry};
use crate::error::CacheError;

/// An in-memory [`CacheBackend`] implementation backed by [`moka`].
///
/// The backend is cheap to clone and shares a single underlying cache.
#[derive(Clone)]
pub struct InMemoryBackend {
    cache: Cache<String, StoredEntry>,
}

#[derive(Clone)]
struct StoredEntry {
    entry: CachedEntry,
    expires_at: SystemTime,
}

impl InMemoryBackend {
    /// Creates a new in-memory cache with the provided `max_capacity`.
    ///
    /// The capacity is expressed in number of cached entries, not bytes.
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder().max_capacity(max_capacity).build();
        Self { cache }
    }

    /// Number of entries currently held, including ones not yet evicted.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<CachedEntry>, CacheError> {
        if let Some(stored) = self.cache.get(key).await {
            if SystemTime::now() >= stored.expires_at {
                self.cache.invalidate(key).await;
                return Ok(None);
            }
            Ok(Some(stored.entry))
        } else {
            Ok(None)
        }
    }

    async fn set(&self, key: String, entry: CachedEntry, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Ok(());
        }

        let stored = StoredEntry {
            entry,
            expires_at: SystemTime::now() + ttl,
        };
        self.cache.insert(key, stored).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::StatusCode;
    use tokio::time::sleep;

    fn entry_with_body(body: &'static [u8]) -> CachedEntry {
        CachedEntry::new(
            StatusCode::OK,
            Vec::new(),
            Bytes::from_static(body),
            SystemTime::now(),
            "\"etag\"".to_owned(),
        )
    }

    #[tokio::test]
    async fn set_and_get_returns_cached_entry() {
        let backend = InMemoryBackend::new(16);
        let entry = entry_with_body(b"alpha");

        backend
            .set("key".into(), entry.clone(), Duration::from_secs(1))
            .await
            .expect("set succeeds");

        let cached = backend
            .get("key")
            .await
            .expect("get succeeds")
            .expect("entry present");
        assert_eq!(cached, entry);
    }

    #[tokio::test]
    async fn set_replaces_previous_entry() {
        let backend = InMemoryBackend::new(16);
        backend
            .set("key".into(), entry_with_body(b"one"), Duration::from_secs(1))
            .await
            .unwrap();
        backend
            .set("key".into(), entry_with_body(b"two"), Duration::from_secs(1))
            .await
            .unwrap();

        let cached = backend.get("key").await.unwrap().unwrap();
        assert_eq!(cached.body, Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn entry_removed_after_ttl() {
        let backend = InMemoryBackend::new(16);

        backend
            .set("key".into(), entry_with_body(b"short"), Duration::from_millis(20))
            .await
            .expect("set succeeds");
        assert!(backend.get("key").await.unwrap().is_some());

        sleep(Duration::from_millis(40)).await;
        assert!(backend.get("key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn zero_ttl_is_not_stored() {
        let backend = InMemoryBackend::new(16);
        backend
            .set("key".into(), entry_with_body(b"nope"), Duration::ZERO)
            .await
            .unwrap();
        assert!(backend.get("key").await.unwrap().is_none());
    }
}
