//! Cache keys and ETags.
//!
//! Keys are derived only from request identity so that two processes sharing
//! a backend compute the same key for the same resource. ETags identify one
//! generation of a cached response.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use http::{HeaderMap, Method, Uri};
use sha2::{Digest, Sha256};

/// Type alias for the key extractor function
type KeyExtractorFn = Arc<dyn Fn(&Method, &Uri, &HeaderMap) -> Option<String> + Send + Sync>;

/// Strategy used to turn requests into cache keys.
///
/// The default, [`KeyExtractor::method_path_and_query`], keys GET and HEAD
/// requests by method, path and query string with the query pairs ordered by name.
/// Other methods produce no key and are passed through uncached.
#[derive(Clone)]
pub struct KeyExtractor {
    inner: KeyExtractorFn,
    headers: Arc<[String]>,
}

impl KeyExtractor {
    /// Builds an extractor that uses `method + path + name-ordered query` for GET/HEAD requests.
    pub fn method_path_and_query() -> Self {
        Self::custom(|method: &Method, uri: &Uri, _: &HeaderMap| {
            if !is_cacheable_method(method) {
                return None;
            }
            let mut key = format!("{} {}", method.as_str(), uri.path());
            if let Some(query) = normalized_query(uri) {
                key.push('?');
                key.push_str(&query);
            }
            Some(key)
        })
    }

    /// Builds an extractor that uses `path + query` verbatim for GET/HEAD requests.
    pub fn path_and_query() -> Self {
        Self::custom(|method: &Method, uri: &Uri, _: &HeaderMap| {
            if is_cacheable_method(method) {
                let mut key = uri.path().to_owned();
                if let Some(query) = uri.query() {
                    key.push('?');
                    key.push_str(query);
                }
                Some(key)
            } else {
                None
            }
        })
    }

    pub fn path() -> Self {
        Self::custom(|method: &Method, uri: &Uri, _: &HeaderMap| {
            if is_cacheable_method(method) {
                Some(uri.path().to_owned())
            } else {
                None
            }
        })
    }

    pub fn custom<F>(func: F) -> Self
    where
        F: Fn(&Method, &Uri, &HeaderMap) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(func),
            headers: Arc::from(Vec::new()),
        }
    }

    /// Adds request header values to the key, for routes whose response
    /// varies on them (e.g. `accept-language`).
    ///
    /// Names are matched case-insensitively; a missing header contributes an
    /// empty value so that "absent" and "present" never share a key. Each
    /// value is prefixed with its byte length, so separators inside a value
    /// cannot make two header sets collide.
    pub fn with_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names
            .into_iter()
            .map(|name| name.into().to_ascii_lowercase())
            .collect();
        names.sort();
        names.dedup();
        self.headers = Arc::from(names);
        self
    }

    /// Extracts a cache key from the provided request parts.
    ///
    /// Returns `None` when the request should be skipped.
    pub fn extract(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> Option<String> {
        let mut key = (self.inner)(method, uri, headers)?;
        for name in self.headers.iter() {
            let value = headers
                .get_all(name.as_str())
                .iter()
                .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(",");
            key.push('|');
            key.push_str(name);
            key.push('=');
            key.push_str(&value.len().to_string());
            key.push(':');
            key.push_str(&value);
        }
        Some(key)
    }
}

impl Default for KeyExtractor {
    fn default() -> Self {
        Self::method_path_and_query()
    }
}

fn is_cacheable_method(method: &Method) -> bool {
    matches!(method, &Method::GET | &Method::HEAD)
}

/// Orders query pairs by parameter name. Repeated parameters keep their
/// relative order since handlers may read them as an ordered list.
fn normalized_query(uri: &Uri) -> Option<String> {
    let query = uri.query().filter(|query| !query.is_empty())?;
    let mut pairs: Vec<&str> = query.split('&').filter(|pair| !pair.is_empty()).collect();
    pairs.sort_by(|a, b| param_name(a).cmp(param_name(b)));
    Some(pairs.join("&"))
}

fn param_name(pair: &str) -> &str {
    pair.split_once('=').map_or(pair, |(name, _)| name)
}

/// Generates the ETag for one generation of a cached response.
///
/// The fingerprint covers the key, the generation time in nanoseconds and
/// the payload. Re-generating an identical payload at a different time
/// yields a different ETag.
pub fn generate_etag(key: &str, payload: &[u8], generated_at: SystemTime) -> String {
    let nanos = generated_at
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update([0u8]);
    hasher.update(nanos.to_be_bytes());
    hasher.update(payload);
    let digest = hasher.finalize();

    format!("\"{}\"", hex::encode(&digest[..16]))
}
