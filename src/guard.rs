//! The idempotency guard.
//!
//! Semantics, per request:
//! 1. Methods outside POST/PUT/PATCH/DELETE pass straight to the handler. No token is
//!    required and the store is never touched.
//! 2. State-changing requests must carry a non-blank `Idempotency-Key`; otherwise the
//!    guard fails with [`IdempotencyError::MissingKey`] before any side effect.
//! 3. A live record under `<namespace>:<METHOD>:<token>` is replayed, tagged `replayed`.
//! 4. On a miss the key is reserved, the handler runs once, its record is stored for the
//!    configured TTL and returned tagged `created`.
//!
//! Invariants:
//! - Handler and store errors are returned unchanged inside `Inner` / `Store`.
//! - A failed handler never leaves a record behind; its reservation is released so the
//!   next retry runs the handler again. The same holds when the request future is
//!   dropped mid-handler (client disconnect, outer timeout, panic).
//! - With a store that implements [`RecordStore::reserve`], concurrent duplicates cannot
//!   both run the handler: the loser replays if the winner already finished, otherwise it
//!   gets [`IdempotencyError::InFlight`].
//!
//! ```rust
//! use idemguard::{IdempotencyGuard, MemoryStore, Record};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let guard = IdempotencyGuard::new(MemoryStore::new());
//! let request = http::Request::post("/bookings")
//!     .header("Idempotency-Key", "abc")
//!     .body(())
//!     .unwrap();
//!
//! let record = guard
//!     .execute(&request, || async { Ok::<_, std::io::Error>(Record::new(201, 1u32)) })
//!     .await
//!     .unwrap();
//! assert_eq!(record.header("X-Idempotency-Result"), Some("created"));
//! # });
//! ```

use crate::config::{GuardConfig, GuardOptions};
use crate::error::IdempotencyError;
use crate::key::{self, CacheKey, IdempotencyKey};
use crate::record::{Outcome, Record};
use crate::store::{RecordStore, Reservation};
use crate::telemetry::{emit_best_effort, GuardEvent, LogSink, TelemetrySink};
use http::{HeaderMap, Method, Request};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

type GuardResult<T, E, SE> = Result<Record<T>, IdempotencyError<E, SE>>;

/// Deduplicates state-changing requests against a caller-owned [`RecordStore`].
pub struct IdempotencyGuard<S, K = LogSink> {
    store: Arc<S>,
    config: GuardConfig,
    sink: K,
}

impl<S, K: Clone> Clone for IdempotencyGuard<S, K> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone(), config: self.config.clone(), sink: self.sink.clone() }
    }
}

impl<S, K> std::fmt::Debug for IdempotencyGuard<S, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyGuard")
            .field("config", &self.config)
            .field("store", &"<store>")
            .field("sink", &"<sink>")
            .finish()
    }
}

impl<S> IdempotencyGuard<S, LogSink> {
    /// Guard with the default configuration (24h retention) logging through `tracing`.
    pub fn new(store: S) -> Self {
        Self::with_config(store, GuardConfig::default())
    }

    pub fn with_config(store: S, config: GuardConfig) -> Self {
        Self::from_shared(Arc::new(store), config)
    }

    /// Share one store handle between several guards.
    pub fn from_shared(store: Arc<S>, config: GuardConfig) -> Self {
        Self { store, config, sink: LogSink }
    }
}

impl<S, K> IdempotencyGuard<S, K> {
    /// Replace the telemetry sink.
    pub fn with_sink<K2: TelemetrySink>(self, sink: K2) -> IdempotencyGuard<S, K2> {
        IdempotencyGuard { store: self.store, config: self.config, sink }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

impl<S, K> IdempotencyGuard<S, K>
where
    K: TelemetrySink,
    K::Future: Send + 'static,
{
    /// Run `handler` for `request` under idempotency rules.
    pub async fn execute<B, T, E, F, Fut>(
        &self,
        request: &Request<B>,
        handler: F,
    ) -> GuardResult<T, E, <S as RecordStore<T>>::Error>
    where
        S: RecordStore<T> + 'static,
        T: Clone + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Record<T>, E>>,
    {
        self.execute_parts(request.method(), request.headers(), handler).await
    }

    /// Same as [`execute`](Self::execute) for callers that only hold the method and
    /// headers, e.g. when the request body is moved into the handler.
    pub async fn execute_parts<T, E, F, Fut>(
        &self,
        method: &Method,
        headers: &HeaderMap,
        handler: F,
    ) -> GuardResult<T, E, <S as RecordStore<T>>::Error>
    where
        S: RecordStore<T> + 'static,
        T: Clone + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Record<T>, E>>,
    {
        let Some(method_name) = key::state_changing(method) else {
            self.emit(GuardEvent::Passthrough { method: method.as_str().to_string() }).await;
            return handler().await.map_err(IdempotencyError::Inner);
        };

        let Some(token) = IdempotencyKey::from_headers(headers) else {
            self.emit(GuardEvent::Rejected { method: method_name.to_string() }).await;
            return Err(IdempotencyError::MissingKey);
        };

        let cache_key = CacheKey::new(self.config.namespace(), method_name, &token);

        let cached =
            self.store.get(cache_key.as_str()).await.map_err(IdempotencyError::<E, _>::Store)?;
        if let Some(cached) = cached {
            return Ok(self.replay(&cache_key, &token, cached).await);
        }

        let reservation = self
            .store
            .reserve(cache_key.as_str(), self.config.lock_ttl())
            .await
            .map_err(IdempotencyError::<E, _>::Store)?;

        if reservation == Reservation::Held {
            // The holder may have finished between our read and the reservation attempt.
            let cached =
                self.store.get(cache_key.as_str()).await.map_err(IdempotencyError::<E, _>::Store)?;
            if let Some(cached) = cached {
                return Ok(self.replay(&cache_key, &token, cached).await);
            }
            self.emit(GuardEvent::Contended { cache_key: cache_key.to_string() }).await;
            return Err(IdempotencyError::InFlight { token: token.to_string() });
        }

        // From here on, any exit without a stored record must free the key, including
        // this future being dropped mid-handler.
        let mut claim = Claim::<S, T>::new(&self.store, &cache_key);

        let record = match handler().await {
            Ok(record) => record,
            Err(e) => {
                claim.release().await;
                self.emit(GuardEvent::HandlerFailed { cache_key: cache_key.to_string() }).await;
                return Err(IdempotencyError::Inner(e));
            }
        };

        if let Err(e) = self.store.set(cache_key.as_str(), record.clone(), self.config.ttl()).await {
            claim.release().await;
            return Err(IdempotencyError::Store(e));
        }
        claim.disarm();

        self.emit(GuardEvent::Created { cache_key: cache_key.to_string(), status: record.status })
            .await;
        Ok(record.tagged(token.as_str(), Outcome::Created))
    }

    async fn replay<T>(
        &self,
        cache_key: &CacheKey,
        token: &IdempotencyKey,
        cached: Record<T>,
    ) -> Record<T> {
        self.emit(GuardEvent::Replayed { cache_key: cache_key.to_string(), status: cached.status })
            .await;
        cached.tagged(token.as_str(), Outcome::Replayed)
    }

    async fn emit(&self, event: GuardEvent) {
        emit_best_effort(self.sink.clone(), event).await;
    }
}

/// One-shot form: guard a single request against `store` with per-call options.
///
/// `ttlMs` defaults to 24 hours. A zero `ttlMs` stores the record with no retention, so
/// a repeat replays only while the store's clock has not moved past the write.
pub async fn guard<B, S, T, E, F, Fut>(
    request: &Request<B>,
    store: &Arc<S>,
    handler: F,
    options: GuardOptions,
) -> GuardResult<T, E, <S as RecordStore<T>>::Error>
where
    S: RecordStore<T> + 'static,
    T: Clone + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Record<T>, E>>,
{
    IdempotencyGuard::from_shared(store.clone(), GuardConfig::from(options))
        .execute(request, handler)
        .await
}

/// An acquired reservation. Dropped while armed, it frees the key.
struct Claim<'a, S, T>
where
    S: RecordStore<T> + 'static,
    T: Send + 'static,
{
    store: &'a Arc<S>,
    key: &'a CacheKey,
    armed: bool,
    _record: PhantomData<fn() -> T>,
}

impl<'a, S, T> Claim<'a, S, T>
where
    S: RecordStore<T> + 'static,
    T: Send + 'static,
{
    fn new(store: &'a Arc<S>, key: &'a CacheKey) -> Self {
        Self { store, key, armed: true, _record: PhantomData }
    }

    /// The record is stored; the key stays claimed by it.
    fn disarm(&mut self) {
        self.armed = false;
    }

    async fn release(mut self) {
        self.armed = false;
        if let Err(e) = RecordStore::<T>::release(&**self.store, self.key.as_str()).await {
            tracing::warn!(key = %self.key, error = %e, "failed to release idempotency reservation");
        }
    }
}

impl<S, T> Drop for Claim<'_, S, T>
where
    S: RecordStore<T> + 'static,
    T: Send + 'static,
{
    fn drop(&mut self) {
        if !self.armed || RecordStore::<T>::try_release(&**self.store, self.key.as_str()) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = Arc::clone(self.store);
                let key = self.key.to_string();
                handle.spawn(async move {
                    if let Err(e) = RecordStore::<T>::release(&*store, &key).await {
                        tracing::warn!(key = %key, error = %e, "failed to release idempotency reservation");
                    }
                });
            }
            Err(_) => tracing::warn!(
                key = %self.key,
                "abandoned idempotency reservation outside a runtime; it expires after lock_ttl"
            ),
        }
    }
}
