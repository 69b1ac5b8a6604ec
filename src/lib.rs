//! Tower Route Cache
//! =================
//!
//! `tower-route-cache` caches HTTP responses per route behind a Tower
//! service. Each route declares an [`Age`]: a maximum age after which a stored
//! response is never served, and a minimum age below which clients cannot
//! force a refresh with `Cache-Control: max-age` or `no-cache`.
//!
//! ```no_run
//! use std::time::Duration;
//! use tower::{Service, ServiceBuilder, ServiceExt};
//! use tower_route_cache::prelude::*;
//!
//! # async fn run() -> Result<(), tower_route_cache::BoxError> {
//! let layer = RouteCacheLayer::builder()
//!     .backend(InMemoryBackend::new(1_000))
//!     .min_age(Duration::from_secs(5))
//!     .max_age(Duration::from_secs(60))
//!     .build()?;
//!
//! let mut svc = ServiceBuilder::new()
//!     .layer(layer)
//!     .service(tower::service_fn(|_req| async {
//!         Ok::<_, std::convert::Infallible>(http::Response::new(http_body_util::Full::<bytes::Bytes>::from("ok")))
//!     }));
//!
//! let response = svc
//!     .ready()
//!     .await?
//!     .call(http::Request::new(()))
//!     .await?;
//! assert!(response.extensions().get::<CacheOutcome>().is_some());
//! # Ok(())
//! # }
//! ```
//!
//! Every response carries the [`CacheOutcome`] in its extensions and an
//! `ETag` header identifying the generation of the response.

pub mod age;
pub mod backend;
pub mod capture;
pub mod clock;
pub mod codec;
pub mod config;
pub mod decision;
pub mod directives;
pub mod error;
pub mod key;
pub mod layer;
pub mod logging;
pub mod prelude;
pub mod request_id;

pub use age::{Age, AgePolicy};
pub use decision::{CacheOutcome, Decision};
pub use error::{BoxError, CacheError, ConfigError, ConfigErrors, ConfigWarning};
pub use key::KeyExtractor;
pub use layer::{RouteCacheLayer, RouteCacheLayerBuilder, RouteCacheService};
