//! Convenient re-exports for common idemguard types.
pub use crate::{
    booking::{has_conflict, BookingInterval, ConflictError},
    config::{GuardConfig, GuardOptions},
    error::{IdempotencyError, Rejection},
    guard::{guard, IdempotencyGuard},
    middleware::IdempotencyLayer,
    record::{Outcome, Record},
    store::{MemoryStore, RecordStore, Reservation},
    telemetry::{GuardEvent, LogSink, MemorySink, TelemetrySink},
    theme::{load_tenant_theme, ThemeSource, ThemeTokens},
};
