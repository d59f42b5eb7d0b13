//! Telemetry for the idempotency guard.
//!
//! Every guard decision is described by a [`GuardEvent`]. Events flow through a
//! [`TelemetrySink`], which is just a `tower::Service<GuardEvent>`, so sinks compose
//! with ordinary tower combinators.
//!
//! ```rust
//! use idemguard::telemetry::{GuardEvent, MemorySink};
//! use tower::{Service, ServiceExt};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let mut sink = MemorySink::new();
//! sink.ready().await.unwrap().call(GuardEvent::Passthrough { method: "GET".into() }).await.unwrap();
//! assert_eq!(sink.len(), 1);
//! # });
//! ```

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tower::Service;

/// A telemetry sink that consumes guard events.
pub trait TelemetrySink:
    tower::Service<GuardEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
///
/// Telemetry never changes what the guard returns: if a sink is not ready or fails,
/// the event is dropped.
pub async fn emit_best_effort<S>(sink: S, event: GuardEvent)
where
    S: tower::Service<GuardEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// What the guard decided for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardEvent {
    /// Safe method, handler called without deduplication.
    Passthrough { method: String },
    /// State-changing request without a usable token.
    Rejected { method: String },
    /// A stored record was returned.
    Replayed { cache_key: String, status: u16 },
    /// The handler ran and its record was stored.
    Created { cache_key: String, status: u16 },
    /// Another request holds the reservation for this key.
    Contended { cache_key: String },
    /// The handler failed; nothing was stored.
    HandlerFailed { cache_key: String },
}

impl fmt::Display for GuardEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardEvent::Passthrough { method } => write!(f, "passthrough method={}", method),
            GuardEvent::Rejected { method } => {
                write!(f, "rejected method={} reason=missing_idempotency_key", method)
            }
            GuardEvent::Replayed { cache_key, status } => {
                write!(f, "replayed key={} status={}", cache_key, status)
            }
            GuardEvent::Created { cache_key, status } => {
                write!(f, "created key={} status={}", cache_key, status)
            }
            GuardEvent::Contended { cache_key } => write!(f, "contended key={}", cache_key),
            GuardEvent::HandlerFailed { cache_key } => {
                write!(f, "handler_failed key={}", cache_key)
            }
        }
    }
}

type SinkFuture = Pin<Box<dyn Future<Output = Result<(), Infallible>> + Send>>;

/// A telemetry sink that logs events using the `tracing` crate.
///
/// Rejections and contention log at `warn`, the rest at `debug`. With no subscriber
/// installed it costs a dispatcher check per event, which makes it the default.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<GuardEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GuardEvent) -> Self::Future {
        match &event {
            GuardEvent::Rejected { .. } | GuardEvent::Contended { .. } => {
                tracing::warn!(event = %event, "idempotency_event")
            }
            _ => tracing::debug!(event = %event, "idempotency_event"),
        }
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// A telemetry sink that stores events in memory, evicting the oldest past `capacity`.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<GuardEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<GuardEvent> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<GuardEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<GuardEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GuardEvent) -> Self::Future {
        let mut guard = self.lock();
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl<'a> MakeWriter<'a> for SharedWriter {
        type Writer = SharedGuard;
        fn make_writer(&'a self) -> Self::Writer {
            SharedGuard(self.0.clone())
        }
    }

    struct SharedGuard(Arc<Mutex<Vec<u8>>>);
    impl Write for SharedGuard {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn memory_sink_evicts_oldest() {
        let sink = MemorySink::with_capacity(2);
        for method in ["GET", "HEAD", "OPTIONS"] {
            emit_best_effort(sink.clone(), GuardEvent::Passthrough { method: method.into() })
                .await;
        }
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.evicted(), 1);
        assert_eq!(sink.events()[0], GuardEvent::Passthrough { method: "HEAD".into() });

        sink.clear();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn log_sink_without_subscriber_is_silent() {
        emit_best_effort(LogSink, GuardEvent::Contended { cache_key: "idem:POST:a".into() })
            .await;
    }

    #[tokio::test]
    async fn emit_best_effort_swallows_errors() {
        #[derive(Clone)]
        struct Fails;
        impl Service<GuardEvent> for Fails {
            type Response = ();
            type Error = std::io::Error;
            type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;
            fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
                Poll::Ready(Err(std::io::Error::new(std::io::ErrorKind::Other, "not ready")))
            }
            fn call(&mut self, _event: GuardEvent) -> Self::Future {
                Box::pin(async { Err(std::io::Error::new(std::io::ErrorKind::Other, "boom")) })
            }
        }

        emit_best_effort(Fails, GuardEvent::Passthrough { method: "GET".into() }).await;
    }

    #[test]
    fn log_sink_writes_rejections_at_warn() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(SharedWriter(buffer.clone())))
            .without_time()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut sink = LogSink;
        let _ = sink.call(GuardEvent::Rejected { method: "POST".into() });

        let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("WARN"));
        assert!(logs.contains("missing_idempotency_key"));
    }

    #[test]
    fn events_display_their_key() {
        let event = GuardEvent::Created { cache_key: "idem:POST:abc".into(), status: 201 };
        assert_eq!(event.to_string(), "created key=idem:POST:abc status=201");
    }
}
