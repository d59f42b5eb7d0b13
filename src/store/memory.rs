//! In-process [`RecordStore`] backed by a mutex-guarded map.
//!
//! Entries expire lazily: an expired record is dropped the next time its key is read or
//! reserved, or in bulk through [`MemoryStore::purge_expired`]. Reservations are pending
//! slots in the same map, so the conditional insert happens under one lock.

use crate::clock::{Clock, MonotonicClock};
use crate::record::Record;
use crate::store::{RecordStore, Reservation};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Slot<T> {
    Pending,
    Ready(Record<T>),
}

#[derive(Debug, Clone)]
struct Entry<T> {
    slot: Slot<T>,
    expires_at: u64,
}

impl<T> Entry<T> {
    fn expired(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

/// Simple in-memory record store with lazy expiry.
///
/// Clones share the same map, so one store can be handed to several guards. Reservations
/// are real conditional inserts under the map lock.
#[derive(Debug)]
pub struct MemoryStore<T> {
    // Map key -> (slot, expires_at_millis)
    entries: Arc<Mutex<HashMap<String, Entry<T>>>>,
    clock: Arc<dyn Clock>,
}

impl<T> Clone for MemoryStore<T> {
    fn clone(&self) -> Self {
        Self { entries: self.entries.clone(), clock: self.clock.clone() }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self { entries: Arc::default(), clock: Arc::new(MonotonicClock::default()) }
    }

    /// Use a custom clock for expiry (e.g. [`crate::clock::ManualClock`] in tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Number of physically stored entries, expired or pending ones included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every expired entry now instead of waiting for a read. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut guard = self.lock();
        let before = guard.len();
        guard.retain(|_, entry| !entry.expired(now));
        before - guard.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry<T>>> {
        // A panic elsewhere cannot leave an entry half-written; keep serving.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove `key` if it is still a pending reservation.
    fn release_pending(&self, key: &str) {
        let mut guard = self.lock();
        if matches!(guard.get(key), Some(Entry { slot: Slot::Pending, .. })) {
            guard.remove(key);
        }
    }

    fn expiry(&self, ttl: Duration) -> u64 {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self.clock.now_millis().saturating_add(ttl_ms)
    }
}

#[async_trait]
impl<T> RecordStore<T> for MemoryStore<T>
where
    T: Clone + Send + 'static,
{
    type Error = std::convert::Infallible;

    async fn get(&self, key: &str) -> Result<Option<Record<T>>, Self::Error> {
        let now = self.clock.now_millis();
        let mut guard = self.lock();
        let expired = match guard.get(key) {
            None => return Ok(None),
            Some(entry) if entry.expired(now) => true,
            Some(Entry { slot: Slot::Ready(record), .. }) => return Ok(Some(record.clone())),
            Some(Entry { slot: Slot::Pending, .. }) => false,
        };
        if expired {
            guard.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, record: Record<T>, ttl: Duration) -> Result<(), Self::Error> {
        let expires_at = self.expiry(ttl);
        self.lock().insert(key.to_string(), Entry { slot: Slot::Ready(record), expires_at });
        Ok(())
    }

    async fn reserve(&self, key: &str, ttl: Duration) -> Result<Reservation, Self::Error> {
        let now = self.clock.now_millis();
        let expires_at = self.expiry(ttl);
        let mut guard = self.lock();
        if let Some(entry) = guard.get(key) {
            if !entry.expired(now) {
                return Ok(Reservation::Held);
            }
        }
        guard.insert(key.to_string(), Entry { slot: Slot::Pending, expires_at });
        Ok(Reservation::Acquired)
    }

    async fn release(&self, key: &str) -> Result<(), Self::Error> {
        self.release_pending(key);
        Ok(())
    }

    fn try_release(&self, key: &str) -> bool {
        self.release_pending(key);
        true
    }
}
