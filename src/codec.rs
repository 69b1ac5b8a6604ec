use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::backend::CachedEntry;
use crate::error::CacheError;

/// Trait representing a serialization strategy for cached entries.
pub trait CacheCodec: Send + Sync + Clone + 'static {
    fn encode(&self, entry: &CachedEntry) -> Result<Vec<u8>, CacheError>;
    fn decode(&self, bytes: &[u8]) -> Result<CachedEntry, CacheError>;
}

/// Default [`CacheCodec`] implementation backed by `bincode`.
#[derive(Clone, Default)]
pub struct BincodeCodec;

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    status: u16,
    headers: Vec<(String, Vec<u8>)>,
    body: Vec<u8>,
    last_valid_nanos: u64,
    etag: String,
}

impl CacheCodec for BincodeCodec {
    fn encode(&self, entry: &CachedEntry) -> Result<Vec<u8>, CacheError> {
        let stored = StoredEntry {
            status: entry.status.as_u16(),
            headers: entry.headers.clone(),
            body: entry.body.to_vec(),
            last_valid_nanos: to_unix_nanos(entry.last_valid)?,
            etag: entry.etag.clone(),
        };

        bincode::serialize(&stored).map_err(|err| CacheError::Codec(err.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<CachedEntry, CacheError> {
        let stored: StoredEntry =
            bincode::deserialize(bytes).map_err(|err| CacheError::Codec(err.to_string()))?;
        Ok(CachedEntry::new(
            StatusCode::from_u16(stored.status).map_err(|err| CacheError::Codec(err.to_string()))?,
            stored.headers,
            Bytes::from(stored.body),
            UNIX_EPOCH + Duration::from_nanos(stored.last_valid_nanos),
            stored.etag,
        ))
    }
}

fn to_unix_nanos(time: SystemTime) -> Result<u64, CacheError> {
    let elapsed = time
        .duration_since(UNIX_EPOCH)
        .map_err(|err| CacheError::Codec(err.to_string()))?;
    Ok(elapsed.as_nanos().min(u64::MAX as u128) as u64)
}
