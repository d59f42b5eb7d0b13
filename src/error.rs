//! Error types for the idempotency guard
use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message returned when a state-changing request carries no usable token.
pub const MISSING_KEY_MESSAGE: &str = "Missing Idempotency-Key header.";
/// Message returned when another request holds the reservation for the same key.
pub const IN_FLIGHT_MESSAGE: &str = "A request with this Idempotency-Key is already in progress.";

/// Unified error type for the guard.
///
/// `E` is the handler's error, `SE` the record store's. Both are carried untouched so the
/// caller sees exactly what failed.
#[derive(Debug, Clone)]
pub enum IdempotencyError<E, SE> {
    /// A state-changing request had no `Idempotency-Key`, or only whitespace.
    MissingKey,
    /// Another request with the same (method, token) is still running its handler.
    InFlight { token: String },
    /// The record store failed during lookup, reservation or write.
    Store(SE),
    /// The handler failed; nothing was cached.
    Inner(E),
}

impl<E: fmt::Display, SE: fmt::Display> fmt::Display for IdempotencyError<E, SE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKey => f.write_str(MISSING_KEY_MESSAGE),
            Self::InFlight { token } => {
                write!(f, "request with idempotency key '{}' is already in progress", token)
            }
            Self::Store(e) => write!(f, "record store failure: {}", e),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E, SE> std::error::Error for IdempotencyError<E, SE>
where
    E: std::error::Error + 'static,
    SE: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl<E, SE> IdempotencyError<E, SE> {
    /// Check if this is the missing/blank token failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::MissingKey)
    }
    /// Check if another request holds the key.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::InFlight { .. })
    }
    /// Check if the store failed.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }
    /// Check if the handler failed.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }
    /// Get the handler error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
    /// Borrow the handler error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
    /// Borrow the store error if present.
    pub fn as_store(&self) -> Option<&SE> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }

    /// Client-facing response for failures raised by the guard itself.
    ///
    /// Handler and store failures return `None`: they belong to the caller.
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Self::MissingKey => Some(Rejection::missing_key()),
            Self::InFlight { .. } => Some(Rejection::in_flight()),
            _ => None,
        }
    }
}

/// A guard-level refusal, ready to be sent to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: u16,
    pub code: &'static str,
    pub message: &'static str,
}

impl Rejection {
    /// 400 `Validation`: the request carried no usable `Idempotency-Key`.
    pub fn missing_key() -> Self {
        Self { status: 400, code: "Validation", message: MISSING_KEY_MESSAGE }
    }

    /// 409 `Conflict`: the same key is being processed right now.
    pub fn in_flight() -> Self {
        Self { status: 409, code: "Conflict", message: IN_FLIGHT_MESSAGE }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorDetail { code: self.code.to_string(), message: self.message.to_string() },
        }
    }

    /// Render as a JSON record: `{"error": {"code": .., "message": ..}}`.
    pub fn into_record(self) -> Record<serde_json::Value> {
        let body = serde_json::json!({
            "error": { "code": self.code, "message": self.message }
        });
        Record::new(self.status, body).with_header("Content-Type", "application/json")
    }
}

/// Structured error payload sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::error::Error;
    use std::io;

    type TestError = IdempotencyError<io::Error, io::Error>;

    #[test]
    fn missing_key_renders_validation_response() {
        let err: TestError = IdempotencyError::MissingKey;
        assert!(err.is_validation());

        let record = err.rejection().unwrap().into_record();
        assert_eq!(record.status, 400);
        assert_eq!(
            record.body,
            json!({"error": {"code": "Validation", "message": "Missing Idempotency-Key header."}})
        );
        assert_eq!(record.header("content-type"), Some("application/json"));
    }

    #[test]
    fn in_flight_renders_conflict_response() {
        let err: TestError = IdempotencyError::InFlight { token: "abc".into() };
        assert!(err.is_in_flight());
        assert!(err.to_string().contains("abc"));

        let rejection = err.rejection().unwrap();
        assert_eq!(rejection.status, 409);
        assert_eq!(rejection.body().error.code, "Conflict");
    }

    #[test]
    fn caller_failures_have_no_rejection() {
        let inner: TestError = IdempotencyError::Inner(io::Error::new(io::ErrorKind::Other, "boom"));
        let store: TestError = IdempotencyError::Store(io::Error::new(io::ErrorKind::Other, "down"));
        assert!(inner.rejection().is_none());
        assert!(store.rejection().is_none());
    }

    #[test]
    fn source_exposes_wrapped_errors() {
        let store: TestError = IdempotencyError::Store(io::Error::new(io::ErrorKind::Other, "down"));
        assert_eq!(store.source().unwrap().to_string(), "down");
        assert!(store.is_store());
        assert!(store.to_string().contains("down"));

        let missing: TestError = IdempotencyError::MissingKey;
        assert!(missing.source().is_none());
    }

    #[test]
    fn into_inner_extracts_handler_error() {
        let err: TestError = IdempotencyError::Inner(io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(err.as_store().is_none());
        assert_eq!(err.as_inner().unwrap().to_string(), "boom");
        assert_eq!(err.into_inner().unwrap().to_string(), "boom");
    }

    #[test]
    fn error_body_round_trips_through_json() {
        let body = Rejection::missing_key().body();
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["error"]["code"], "Validation");
    }
}
