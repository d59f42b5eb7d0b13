#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # idemguard
//!
//! `Idempotency-Key` enforcement for state-changing requests, plus the small helpers a
//! booking product needs around it.
//!
//! ## Features
//!
//! - **Idempotency guard** that replays the first result for retried POST/PUT/PATCH/DELETE
//!   requests instead of running the handler again
//! - **Pluggable record stores** with TTL expiry and optional atomic reservations
//! - **Tower middleware** wrapping any service that answers with a [`Record`]
//! - **Telemetry sinks** built on `tower::Service` and `tracing`
//! - **Booking conflict checks** and **tenant theme loading**
//!
//! ## Quick Start
//!
//! ```rust
//! use idemguard::{guard, GuardOptions, MemoryStore, Record};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(MemoryStore::new());
//!     let request = http::Request::post("/bookings")
//!         .header("Idempotency-Key", "abc")
//!         .body(())
//!         .unwrap();
//!
//!     let handler = || async { Ok::<_, std::io::Error>(Record::new(201, serde_json::json!({"id": 1}))) };
//!
//!     let first = guard(&request, &store, handler, GuardOptions::default()).await.unwrap();
//!     let again = guard(&request, &store, handler, GuardOptions::default()).await.unwrap();
//!
//!     assert_eq!(first.header("X-Idempotency-Result"), Some("created"));
//!     assert_eq!(again.header("X-Idempotency-Result"), Some("replayed"));
//!     assert_eq!(first.body, again.body);
//! }
//! ```

pub mod booking;
pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod key;
pub mod middleware;
pub mod prelude;
pub mod record;
pub mod store;
pub mod telemetry;
pub mod theme;

// Re-exports
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{BuildError, GuardConfig, GuardConfigBuilder, GuardOptions};
pub use error::{IdempotencyError, Rejection};
pub use guard::{guard, IdempotencyGuard};
pub use key::{is_state_changing, CacheKey, IdempotencyKey};
pub use middleware::{IdempotencyLayer, IdempotencyService};
pub use record::{Outcome, Record, IDEMPOTENCY_KEY_HEADER, IDEMPOTENCY_RESULT_HEADER};
pub use store::{MemoryStore, RecordStore, Reservation};
