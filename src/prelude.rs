//! Re-exports for consumers who prefer a single import.
//!
//! ```no_run
//! use tower_route_cache::prelude::*;
//! # use std::time::Duration;
//! let layer = RouteCacheLayer::new(
//!     InMemoryBackend::new(128),
//!     Age::new(Duration::ZERO, Duration::from_secs(30)),
//! );
//! # drop(layer);
//! ```

pub use crate::age::Age;
pub use crate::backend::memory::InMemoryBackend;
#[cfg(feature = "redis-backend")]
pub use crate::backend::redis::RedisBackend;
pub use crate::backend::{CacheBackend, CachedEntry};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::codec::{BincodeCodec, CacheCodec};
pub use crate::config::RouteCacheConfig;
pub use crate::decision::CacheOutcome;
pub use crate::key::KeyExtractor;
pub use crate::layer::{RouteCacheLayer, RouteCacheLayerBuilder};
pub use crate::logging::CacheEventConfig;
