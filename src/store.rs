//! Record storage contract.
//!
//! The guard never holds state of its own: every record lives in a [`RecordStore`]
//! handed to it by the caller. The contract is a key-value store with TTL expiry:
//! - `get` returns a record only if it is present and not expired.
//! - `set` overwrites unconditionally and stamps `now + ttl` as the expiry.
//! - `reserve` / `release` are optional. Stores that can insert conditionally (e.g.
//!   Redis `SET NX PX`) implement them so concurrent duplicates cannot both run the
//!   handler. The defaults grant every reservation, which keeps plain get/set stores
//!   usable with the at-most-once guarantee only holding for sequential requests.

use crate::record::Record;
use async_trait::async_trait;
use std::time::Duration;

pub mod memory;
pub use memory::MemoryStore;

/// Result of trying to claim a key before running the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The caller owns the key and should run the handler.
    Acquired,
    /// Someone else already holds the key, either in flight or completed.
    Held,
}

impl Reservation {
    pub fn is_acquired(&self) -> bool {
        matches!(self, Reservation::Acquired)
    }
}

/// Abstract storage interface for cached handler results.
#[async_trait]
pub trait RecordStore<T>: Send + Sync
where
    T: Send + 'static,
{
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch a live record. Expired entries and pending reservations read as `None`.
    async fn get(&self, key: &str) -> Result<Option<Record<T>>, Self::Error>;

    /// Store `record` under `key` for `ttl`, replacing whatever was there.
    async fn set(&self, key: &str, record: Record<T>, ttl: Duration) -> Result<(), Self::Error>;

    /// Claim `key` for `ttl` if nothing live is stored under it.
    async fn reserve(&self, _key: &str, _ttl: Duration) -> Result<Reservation, Self::Error> {
        Ok(Reservation::Acquired)
    }

    /// Drop a pending reservation. Completed records are left alone.
    async fn release(&self, _key: &str) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Drop a pending reservation without awaiting, if the store can.
    ///
    /// Used when a guarded request is dropped mid-flight (client gone, outer timeout,
    /// handler panic) and nothing can be awaited. Return `false` when only
    /// [`release`](Self::release) can do it; the guard then spawns that on the current
    /// tokio runtime.
    fn try_release(&self, _key: &str) -> bool {
        false
    }
}
