use std::collections::HashSet;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use http::header::{CACHE_CONTROL, ETAG, IF_NONE_MATCH};
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri};
use http_body::Body;
use http_body_util::Full;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tower::{Layer, Service, ServiceExt};

#[cfg(feature = "metrics")]
use metrics::counter;

use crate::age::{Age, AgePolicy};
use crate::backend::{CacheBackend, CachedEntry};
use crate::capture::CaptureBuffer;
use crate::clock::{Clock, SystemClock};
use crate::config::RouteCacheConfig;
use crate::decision::{decide, CacheOutcome, Decision, Freshness};
use crate::directives::{if_none_match, RequestDirectives};
pub use crate::error::BoxError;
use crate::error::{ConfigError, ConfigErrors, ConfigWarning};
use crate::key::{generate_etag, KeyExtractor};
use crate::logging::{CacheEvent, CacheEventConfig, CacheEventType};
use crate::request_id::RequestId;

/// Statuses stored by default.
const DEFAULT_STATUSES: [u16; 7] = [200, 203, 204, 300, 301, 404, 410];

/// Caching layer for a single route.
///
/// The layer wraps an inner service and answers requests from the backend
/// while the stored entry is fresh according to the route's [`Age`] and the
/// client's `Cache-Control` directives. Create instances with
/// [`RouteCacheLayer::builder`], [`RouteCacheLayer::new`] or
/// [`RouteCacheLayer::from_config`].
///
/// Cloning a `RouteCacheLayer` is cheap and shares the backend.
#[derive(Clone)]
pub struct RouteCacheLayer<B> {
    shared: Arc<Shared<B>>,
    warnings: Vec<ConfigWarning>,
}

struct Shared<B> {
    backend: B,
    policy: AgePolicy,
    statuses: HashSet<u16>,
    key_extractor: KeyExtractor,
    clock: Arc<dyn Clock>,
    flights: Option<Arc<DashMap<String, Arc<Mutex<()>>>>>,
    events: CacheEventConfig,
}

/// Builder for configuring [`RouteCacheLayer`] instances.
///
/// [`build`](RouteCacheLayerBuilder::build) reports every configuration
/// problem at once.
pub struct RouteCacheLayerBuilder<B> {
    backend: Option<B>,
    age: Age,
    statuses: HashSet<u16>,
    key_extractor: KeyExtractor,
    clock: Arc<dyn Clock>,
    single_flight: bool,
    events: CacheEventConfig,
}

impl<B> Default for RouteCacheLayerBuilder<B> {
    fn default() -> Self {
        Self {
            backend: None,
            age: Age::default(),
            statuses: HashSet::from(DEFAULT_STATUSES),
            key_extractor: KeyExtractor::default(),
            clock: Arc::new(SystemClock),
            single_flight: false,
            events: CacheEventConfig::default(),
        }
    }
}

impl<B> RouteCacheLayerBuilder<B>
where
    B: CacheBackend,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: B) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn age(mut self, age: Age) -> Self {
        self.age = age;
        self
    }

    pub fn min_age(mut self, min: Duration) -> Self {
        self.age.min = min;
        self
    }

    pub fn max_age(mut self, max: Duration) -> Self {
        self.age.max = max;
        self
    }

    /// Replaces the set of status codes whose responses are stored.
    pub fn statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    pub fn key_extractor(mut self, extractor: KeyExtractor) -> Self {
        self.key_extractor = extractor;
        self
    }

    pub fn clock<C: Clock>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Makes concurrent misses for one key wait for a single handler call.
    ///
    /// Disabled by default: concurrent misses each run the handler and the
    /// last store wins.
    pub fn single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    pub fn events(mut self, config: CacheEventConfig) -> Self {
        self.events = config;
        self
    }

    pub fn build(self) -> Result<RouteCacheLayer<B>, ConfigErrors> {
        let validated = self.age.validate();

        let mut errors = Vec::new();
        if self.backend.is_none() {
            errors.push(ConfigError::MissingBackend);
        }
        errors.extend(validated.errors);

        let backend = match self.backend {
            Some(backend) if errors.is_empty() => backend,
            _ => return Err(ConfigErrors::new(errors)),
        };

        Ok(RouteCacheLayer {
            shared: Arc::new(Shared {
                backend,
                policy: validated.policy,
                statuses: self.statuses,
                key_extractor: self.key_extractor,
                clock: self.clock,
                flights: self.single_flight.then(|| Arc::new(DashMap::new())),
                events: self.events,
            }),
            warnings: validated.warnings,
        })
    }
}

impl<B> RouteCacheLayer<B>
where
    B: CacheBackend,
{
    /// Builds a layer with default settings for `backend` and `age`.
    pub fn new(backend: B, age: Age) -> Result<Self, ConfigErrors> {
        Self::builder().backend(backend).age(age).build()
    }

    /// Returns a builder for fine-grained control over the layer.
    pub fn builder() -> RouteCacheLayerBuilder<B> {
        RouteCacheLayerBuilder::new()
    }

    pub fn from_config(backend: B, config: &RouteCacheConfig) -> Result<Self, ConfigErrors> {
        let mut builder = Self::builder()
            .backend(backend)
            .age(config.age())
            .single_flight(config.single_flight)
            .key_extractor(KeyExtractor::default().with_headers(config.vary_headers.clone()));
        if let Some(statuses) = &config.statuses {
            builder = builder.statuses(statuses.iter().copied());
        }
        builder.build()
    }

    pub fn policy(&self) -> AgePolicy {
        self.shared.policy
    }

    /// Non-fatal findings from construction.
    pub fn warnings(&self) -> &[ConfigWarning] {
        &self.warnings
    }

    pub fn backend(&self) -> &B {
        &self.shared.backend
    }
}

impl<S, B> Layer<S> for RouteCacheLayer<B>
where
    B: CacheBackend,
{
    type Service = RouteCacheService<S, B>;

    fn layer(&self, inner: S) -> Self::Service {
        RouteCacheService {
            inner,
            shared: self.shared.clone(),
        }
    }
}

/// Service produced by [`RouteCacheLayer`].
pub struct RouteCacheService<S, B> {
    inner: S,
    shared: Arc<Shared<B>>,
}

impl<S: Clone, B> Clone for RouteCacheService<S, B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            shared: self.shared.clone(),
        }
    }
}

/// Per-request data kept while the response future runs.
struct RequestContext {
    method: Method,
    uri: Uri,
    key: Option<String>,
    directives: RequestDirectives,
    conditional: HeaderMap,
    request_id: Option<RequestId>,
    started: Instant,
}

impl<S, B, ReqBody, ResBody> Service<Request<ReqBody>> for RouteCacheService<S, B>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError> + Send,
    ReqBody: Send + 'static,
    ResBody: Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError> + Send,
    B: CacheBackend,
{
    type Response = Response<Full<Bytes>>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let shared = self.shared.clone();
        let inner = self.inner.clone();

        let mut conditional = HeaderMap::new();
        for value in req.headers().get_all(IF_NONE_MATCH) {
            conditional.append(IF_NONE_MATCH, value.clone());
        }
        let ctx = RequestContext {
            key: shared
                .key_extractor
                .extract(req.method(), req.uri(), req.headers()),
            directives: RequestDirectives::from_headers(req.headers()),
            request_id: shared
                .events
                .enabled
                .then(|| RequestId::from_headers(req.headers())),
            method: req.method().clone(),
            uri: req.uri().clone(),
            conditional,
            started: Instant::now(),
        };

        Box::pin(async move { shared.respond(inner, req, ctx).await })
    }
}

impl<B> Shared<B>
where
    B: CacheBackend,
{
    async fn respond<S, ReqBody, ResBody>(
        &self,
        inner: S,
        req: Request<ReqBody>,
        ctx: RequestContext,
    ) -> Result<Response<Full<Bytes>>, BoxError>
    where
        S: Service<Request<ReqBody>, Response = Response<ResBody>>,
        S::Error: Into<BoxError>,
        ResBody: Body<Data = Bytes>,
        ResBody::Error: Into<BoxError>,
    {
        let Some(key) = ctx.key.clone() else {
            return self.execute(inner, req, &ctx, Decision::Bypass).await;
        };

        let existing = self.lookup(&key, &ctx).await;
        let decision = decide(
            existing.as_ref(),
            &self.policy,
            &ctx.directives,
            self.clock.now(),
        );

        #[cfg(feature = "tracing")]
        tracing::debug!(key = %key, decision = ?decision, method = %ctx.method, uri = %ctx.uri, "route_cache_decision");

        if let (Decision::Hit, Some(entry)) = (decision, existing) {
            return Ok(self.serve_hit(entry, &ctx));
        }

        let _flight = match (&self.flights, decision) {
            (Some(flights), Decision::Miss) => {
                match FlightGuard::acquire_handle(flights.clone(), key.clone()).await {
                    FlightHandle::Leader(guard) => Some(guard),
                    FlightHandle::Follower(lock) => {
                        drop(lock.lock_owned().await);

                        if let Some(entry) = self.lookup(&key, &ctx).await {
                            let now = self.clock.now();
                            if decide(Some(&entry), &self.policy, &ctx.directives, now)
                                == Decision::Hit
                            {
                                return Ok(self.serve_hit(entry, &ctx));
                            }
                        }

                        match FlightGuard::acquire_handle(flights.clone(), key.clone()).await {
                            FlightHandle::Leader(guard) => Some(guard),
                            FlightHandle::Follower(_) => None,
                        }
                    }
                }
            }
            _ => None,
        };

        self.execute(inner, req, &ctx, decision).await
    }

    async fn lookup(&self, key: &str, ctx: &RequestContext) -> Option<CachedEntry> {
        match self.backend.get(key).await {
            Ok(entry) => entry,
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(key = %key, error = %_err, "route cache lookup failed, treating as miss");
                #[cfg(feature = "metrics")]
                counter!("tower_route_cache.lookup_error").increment(1);
                self.emit(ctx, CacheEventType::LookupFailed, |event| event);
                None
            }
        }
    }

    fn serve_hit(&self, entry: CachedEntry, ctx: &RequestContext) -> Response<Full<Bytes>> {
        #[cfg(feature = "metrics")]
        counter!("tower_route_cache.hit").increment(1);

        let freshness = Freshness::evaluate(
            entry.last_valid,
            &self.policy,
            &RequestDirectives::default(),
            self.clock.now(),
        );

        // Only a successful representation can be revalidated; a cached 404
        // or 410 is replayed as-is.
        if entry.status.is_success() && if_none_match(&ctx.conditional, &entry.etag) {
            self.emit(ctx, CacheEventType::NotModified, |event| {
                event
                    .with_status(StatusCode::NOT_MODIFIED)
                    .with_etag(entry.etag.clone())
                    .with_age(freshness.age)
            });

            let mut response = Response::new(Full::new(Bytes::new()));
            *response.status_mut() = StatusCode::NOT_MODIFIED;
            if let Ok(etag) = HeaderValue::from_str(&entry.etag) {
                response.headers_mut().insert(ETAG, etag);
            }
            set_max_age(response.headers_mut(), freshness.remaining());
            response.extensions_mut().insert(CacheOutcome::Hit);
            return response;
        }

        self.emit(ctx, CacheEventType::Hit, |event| {
            event
                .with_status(entry.status)
                .with_etag(entry.etag.clone())
                .with_age(freshness.age)
                .with_size(entry.body.len())
        });

        let mut response = entry.into_response();
        set_max_age(response.headers_mut(), freshness.remaining());
        response.extensions_mut().insert(CacheOutcome::Hit);
        response
    }

    async fn execute<S, ReqBody, ResBody>(
        &self,
        inner: S,
        req: Request<ReqBody>,
        ctx: &RequestContext,
        decision: Decision,
    ) -> Result<Response<Full<Bytes>>, BoxError>
    where
        S: Service<Request<ReqBody>, Response = Response<ResBody>>,
        S::Error: Into<BoxError>,
        ResBody: Body<Data = Bytes>,
        ResBody::Error: Into<BoxError>,
    {
        let captured = match inner.oneshot(req).await {
            Ok(response) => CaptureBuffer::capture(response).await,
            Err(err) => Err(err.into()),
        };
        let snapshot = match captured {
            Ok(snapshot) => snapshot,
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(key = ?ctx.key, error = %err, "route cache handler failed");
                #[cfg(feature = "metrics")]
                counter!("tower_route_cache.error").increment(1);
                self.emit(ctx, CacheEventType::Error, |event| event);
                return Err(err);
            }
        };

        let generated_at = self.clock.now();
        let etag_key = ctx
            .key
            .clone()
            .unwrap_or_else(|| format!("{} {}", ctx.method, ctx.uri));
        let etag = generate_etag(&etag_key, &snapshot.body, generated_at);
        let entry = snapshot.into_entry(etag, generated_at);

        let outcome = CacheOutcome::from(decision);
        #[cfg(feature = "metrics")]
        match outcome {
            CacheOutcome::Miss => counter!("tower_route_cache.miss").increment(1),
            _ => counter!("tower_route_cache.bypass").increment(1),
        }
        self.emit(ctx, outcome.into(), |event| {
            event
                .with_status(entry.status)
                .with_etag(entry.etag.clone())
                .with_size(entry.body.len())
        });

        let stored = match &ctx.key {
            Some(key)
                if decision == Decision::Miss
                    && self.statuses.contains(&entry.status.as_u16()) =>
            {
                self.store(key, &entry, ctx).await
            }
            _ => false,
        };

        let mut response = entry.into_response();
        if stored {
            set_max_age(response.headers_mut(), self.policy.max_secs());
        }
        response.extensions_mut().insert(outcome);
        Ok(response)
    }

    /// Writes `entry` for `key`. Failures are logged and reported as `false`.
    async fn store(&self, key: &str, entry: &CachedEntry, ctx: &RequestContext) -> bool {
        let ttl = self.policy.max_ttl();
        match self.backend.set(key.to_owned(), entry.clone(), ttl).await {
            Ok(()) => {
                #[cfg(feature = "metrics")]
                counter!("tower_route_cache.store").increment(1);
                self.emit(ctx, CacheEventType::Store, |event| {
                    event
                        .with_etag(entry.etag.clone())
                        .with_size(entry.body.len())
                        .with_ttl(ttl)
                });
                true
            }
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(key = %key, error = %_err, "route cache store failed, serving uncached response");
                #[cfg(feature = "metrics")]
                counter!("tower_route_cache.store_error").increment(1);
                self.emit(ctx, CacheEventType::StoreFailed, |event| event);
                false
            }
        }
    }

    fn emit<F>(&self, ctx: &RequestContext, event_type: CacheEventType, build: F)
    where
        F: FnOnce(CacheEvent) -> CacheEvent,
    {
        let Some(request_id) = &ctx.request_id else {
            return;
        };
        let event = CacheEvent::new(event_type, request_id.clone())
            .with_key(ctx.key.clone())
            .with_method(ctx.method.clone())
            .with_uri(ctx.uri.clone())
            .with_latency(ctx.started.elapsed());
        build(event).log(&self.events);
    }
}

/// Adds `Cache-Control: max-age` unless the handler chose its own.
fn set_max_age(headers: &mut HeaderMap, seconds: u64) {
    if headers.contains_key(CACHE_CONTROL) {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(&format!("max-age={seconds}")) {
        headers.insert(CACHE_CONTROL, value);
    }
}

struct FlightGuard {
    key: String,
    flights: Arc<DashMap<String, Arc<Mutex<()>>>>,
    lock: Arc<Mutex<()>>,
    _guard: OwnedMutexGuard<()>,
}

enum FlightHandle {
    Leader(FlightGuard),
    Follower(Arc<Mutex<()>>),
}

impl FlightGuard {
    async fn acquire_handle(
        flights: Arc<DashMap<String, Arc<Mutex<()>>>>,
        key: String,
    ) -> FlightHandle {
        let lock = match flights.entry(key.clone()) {
            Entry::Occupied(entry) => return FlightHandle::Follower(entry.get().clone()),
            Entry::Vacant(entry) => {
                let lock = Arc::new(Mutex::new(()));
                entry.insert(lock.clone());
                lock
            }
        };
        let guard = lock.clone().lock_owned().await;
        FlightHandle::Leader(FlightGuard {
            key,
            flights,
            lock,
            _guard: guard,
        })
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.flights
            .remove_if(&self.key, |_, current| Arc::ptr_eq(&self.lock, current));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::InMemoryBackend;
    use tokio::task::yield_now;

    #[test]
    fn build_reports_every_error() {
        let result = RouteCacheLayer::<InMemoryBackend>::builder()
            .min_age(Duration::from_secs(10))
            .max_age(Duration::from_secs(5))
            .build();

        let errors = result.err().expect("invalid configuration");
        assert_eq!(
            errors.errors(),
            &[
                ConfigError::MissingBackend,
                ConfigError::MinAgeExceedsMaxAge {
                    min: Duration::from_secs(10),
                    max: Duration::from_secs(5),
                },
            ]
        );
    }

    #[test]
    fn zero_age_builds_with_warning() {
        let layer = RouteCacheLayer::new(InMemoryBackend::new(8), Age::default()).unwrap();
        assert_eq!(layer.warnings(), &[ConfigWarning::CachingDisabled]);
        assert!(layer.policy().is_disabled());

        let sub_second = RouteCacheLayer::new(
            InMemoryBackend::new(8),
            Age::new(Duration::ZERO, Duration::from_millis(500)),
        )
        .unwrap();
        assert_eq!(sub_second.warnings(), &[ConfigWarning::CachingDisabled]);
        assert!(sub_second.policy().is_disabled());
    }

    #[test]
    fn from_config_applies_options() {
        let config = RouteCacheConfig {
            min_age: Duration::from_secs(1),
            max_age: Duration::from_secs(30),
            statuses: Some([200].into_iter().collect()),
            vary_headers: vec!["accept".to_owned()],
            single_flight: true,
        };

        let layer = RouteCacheLayer::from_config(InMemoryBackend::new(8), &config).unwrap();
        assert_eq!(layer.policy().max_secs(), 30);
        assert!(layer.shared.flights.is_some());
        assert_eq!(layer.shared.statuses, HashSet::from([200]));
        assert!(layer.warnings().is_empty());
    }

    #[test]
    fn set_max_age_keeps_handler_cache_control() {
        let mut headers = HeaderMap::new();
        set_max_age(&mut headers, 42);
        assert_eq!(headers[CACHE_CONTROL], "max-age=42");

        let mut custom = HeaderMap::new();
        custom.insert(CACHE_CONTROL, HeaderValue::from_static("private"));
        set_max_age(&mut custom, 42);
        assert_eq!(custom[CACHE_CONTROL], "private");
    }

    #[tokio::test]
    async fn flight_guard_drop_removes_lock_entry() {
        let flights = Arc::new(DashMap::new());
        let key = "key".to_string();

        match FlightGuard::acquire_handle(flights.clone(), key.clone()).await {
            FlightHandle::Leader(guard) => {
                assert!(flights.get(&key).is_some());
                match FlightGuard::acquire_handle(flights.clone(), key.clone()).await {
                    FlightHandle::Follower(_) => {}
                    FlightHandle::Leader(_) => panic!("expected follower while leader is alive"),
                }
                drop(guard);
                yield_now().await;
                assert!(flights.get(&key).is_none());
            }
            FlightHandle::Follower(_) => panic!("expected leader guard"),
        }
    }

    #[test]
    fn route_cache_service_implements_clone() {
        use tower::service_fn;

        fn assert_clone<T: Clone>(_: &T) {}

        let layer = RouteCacheLayer::new(
            InMemoryBackend::new(8),
            Age::new(Duration::ZERO, Duration::from_secs(5)),
        )
        .unwrap();
        let service = layer.layer(service_fn(|_req: Request<()>| async {
            Ok::<_, std::convert::Infallible>(Response::new(Full::<Bytes>::from("ok")))
        }));

        assert_clone(&service);
    }
}
