//! Tower middleware applying the idempotency guard to every request.
//!
//! The wrapped service must answer `http::Request<B>` with a [`Record<T>`]; the layer
//! turns it into a service with the same response type and an
//! [`IdempotencyError`] error type.
//!
//! ```rust
//! use idemguard::{IdempotencyLayer, MemoryStore, Record};
//! use tower::{service_fn, ServiceBuilder, ServiceExt};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let svc = ServiceBuilder::new()
//!     .layer(IdempotencyLayer::new(MemoryStore::new()))
//!     .service(service_fn(|_req: http::Request<()>| async {
//!         Ok::<_, std::io::Error>(Record::new(201, "booked"))
//!     }));
//!
//! let req = http::Request::post("/bookings").header("Idempotency-Key", "k1").body(()).unwrap();
//! let record = svc.oneshot(req).await.unwrap();
//! assert_eq!(record.status, 201);
//! # });
//! ```

use crate::config::GuardConfig;
use crate::error::IdempotencyError;
use crate::guard::IdempotencyGuard;
use crate::record::Record;
use crate::store::RecordStore;
use crate::telemetry::{LogSink, TelemetrySink};
use futures::future::BoxFuture;
use http::Request;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// A layer that deduplicates state-changing requests using an [`IdempotencyGuard`].
///
/// The store sits behind an `Arc`, so cloning the layer only needs a clonable sink.
pub struct IdempotencyLayer<S, K = LogSink> {
    guard: IdempotencyGuard<S, K>,
}

impl<S, K: Clone> Clone for IdempotencyLayer<S, K> {
    fn clone(&self) -> Self {
        Self { guard: self.guard.clone() }
    }
}

impl<S, K> std::fmt::Debug for IdempotencyLayer<S, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyLayer").field("guard", &self.guard).finish()
    }
}

impl<S> IdempotencyLayer<S> {
    /// Create a layer with the default configuration.
    pub fn new(store: S) -> Self {
        Self { guard: IdempotencyGuard::new(store) }
    }

    pub fn with_config(store: S, config: GuardConfig) -> Self {
        Self { guard: IdempotencyGuard::with_config(store, config) }
    }

    /// Build the layer over a store that is also used elsewhere.
    pub fn from_shared(store: Arc<S>, config: GuardConfig) -> Self {
        Self { guard: IdempotencyGuard::from_shared(store, config) }
    }
}

impl<S, K> IdempotencyLayer<S, K> {
    pub fn from_guard(guard: IdempotencyGuard<S, K>) -> Self {
        Self { guard }
    }

    /// Replace the telemetry sink.
    pub fn with_sink<K2: TelemetrySink>(self, sink: K2) -> IdempotencyLayer<S, K2> {
        IdempotencyLayer { guard: self.guard.with_sink(sink) }
    }
}

impl<Svc, S, K: Clone> Layer<Svc> for IdempotencyLayer<S, K> {
    type Service = IdempotencyService<Svc, S, K>;

    fn layer(&self, service: Svc) -> Self::Service {
        IdempotencyService { inner: service, guard: self.guard.clone() }
    }
}

/// Middleware service produced by [`IdempotencyLayer`].
pub struct IdempotencyService<Svc, S, K = LogSink> {
    inner: Svc,
    guard: IdempotencyGuard<S, K>,
}

impl<Svc: Clone, S, K: Clone> Clone for IdempotencyService<Svc, S, K> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), guard: self.guard.clone() }
    }
}

impl<Svc: std::fmt::Debug, S, K> std::fmt::Debug for IdempotencyService<Svc, S, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyService")
            .field("inner", &self.inner)
            .field("guard", &self.guard)
            .finish()
    }
}

impl<Svc, S, K> IdempotencyService<Svc, S, K> {
    pub fn new(inner: Svc, guard: IdempotencyGuard<S, K>) -> Self {
        Self { inner, guard }
    }

    pub fn get_ref(&self) -> &Svc {
        &self.inner
    }
}

impl<Svc, S, K, B, T> Service<Request<B>> for IdempotencyService<Svc, S, K>
where
    Svc: Service<Request<B>, Response = Record<T>> + Clone + Send + 'static,
    Svc::Future: Send + 'static,
    Svc::Error: Send + 'static,
    S: RecordStore<T> + 'static,
    T: Clone + Send + 'static,
    K: TelemetrySink + Sync,
    <K as Service<crate::telemetry::GuardEvent>>::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = Record<T>;
    type Error = IdempotencyError<Svc::Error, <S as RecordStore<T>>::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(IdempotencyError::Inner)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        // Hand the readied service to the future and keep a fresh clone for next time.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let guard = self.guard.clone();

        Box::pin(async move {
            let method = req.method().clone();
            let headers = req.headers().clone();
            guard.execute_parts(&method, &headers, move || inner.call(req)).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Outcome;
    use crate::store::MemoryStore;
    use crate::telemetry::{GuardEvent, MemorySink};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::{service_fn, ServiceBuilder, ServiceExt};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    fn post(key: Option<&str>, body: &str) -> Request<String> {
        let mut builder = Request::post("/bookings");
        if let Some(key) = key {
            builder = builder.header("Idempotency-Key", key);
        }
        builder.body(body.to_string()).unwrap()
    }

    #[tokio::test]
    async fn replays_through_the_layer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let store = MemoryStore::<String>::new();
        let svc = ServiceBuilder::new().layer(IdempotencyLayer::new(store)).service(service_fn(
            move |req: Request<String>| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TestError>(Record::new(201, req.into_body()))
                }
            },
        ));

        let first = svc.clone().oneshot(post(Some("k1"), "first")).await.unwrap();
        let second = svc.clone().oneshot(post(Some("k1"), "second")).await.unwrap();

        assert_eq!(first.outcome(), Some(Outcome::Created));
        assert_eq!(second.outcome(), Some(Outcome::Replayed));
        assert_eq!(second.body, "first");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_key_never_reaches_inner_service() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sink = MemorySink::new();
        let layer = IdempotencyLayer::new(MemoryStore::<String>::new()).with_sink(sink.clone());
        let svc = layer.layer(service_fn(move |_req: Request<String>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, TestError>(Record::new(201, String::new())) }
        }));

        let err = svc.oneshot(post(None, "x")).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.rejection().unwrap().status, 400);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(sink.events(), vec![GuardEvent::Rejected { method: "POST".into() }]);
    }

    #[tokio::test]
    async fn inner_errors_propagate_unchanged() {
        let svc = IdempotencyLayer::new(MemoryStore::<String>::new()).layer(service_fn(
            |_req: Request<String>| async {
                Err::<Record<String>, _>(TestError("slot taken".into()))
            },
        ));

        let err = svc.oneshot(post(Some("k1"), "x")).await.unwrap_err();
        assert_eq!(err.into_inner(), Some(TestError("slot taken".into())));
    }

    #[tokio::test]
    async fn get_requests_bypass_the_store() {
        let store = Arc::new(MemoryStore::<String>::new());
        let svc = IdempotencyLayer::from_shared(store.clone(), GuardConfig::default()).layer(
            service_fn(|_req: Request<String>| async {
                Ok::<_, TestError>(Record::new(200, "list".to_string()))
            }),
        );

        let req = Request::get("/bookings").body(String::new()).unwrap();
        let record = svc.oneshot(req).await.unwrap();
        assert_eq!(record.status, 200);
        assert!(record.outcome().is_none());
        assert!(store.is_empty());
    }

    /// Shared-only store: usable behind the layer's `Arc` without being `Clone`.
    struct SharedOnlyStore(MemoryStore<String>);

    #[async_trait::async_trait]
    impl RecordStore<String> for SharedOnlyStore {
        type Error = std::convert::Infallible;

        async fn get(&self, key: &str) -> Result<Option<Record<String>>, Self::Error> {
            self.0.get(key).await
        }

        async fn set(
            &self,
            key: &str,
            record: Record<String>,
            ttl: std::time::Duration,
        ) -> Result<(), Self::Error> {
            self.0.set(key, record, ttl).await
        }
    }

    #[tokio::test]
    async fn layers_over_non_clone_stores_can_be_cloned() {
        let layer = IdempotencyLayer::new(SharedOnlyStore(MemoryStore::new()));
        let svc = ServiceBuilder::new().layer(layer.clone()).service(service_fn(
            |req: Request<String>| async move {
                Ok::<_, TestError>(Record::new(201, req.into_body()))
            },
        ));

        let first = svc.clone().oneshot(post(Some("k1"), "first")).await.unwrap();
        let second = svc.oneshot(post(Some("k1"), "second")).await.unwrap();

        assert_eq!(first.outcome(), Some(Outcome::Created));
        assert_eq!(second.body, "first");
        assert!(format!("{:?}", layer).starts_with("IdempotencyLayer"));
    }
}
