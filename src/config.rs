//! Guard configuration.
//!
//! Two entry points:
//! - [`GuardConfig::builder`] for code that wants every knob, validated at build time.
//! - [`GuardOptions`], the loose `{ "ttlMs": .. }` form accepted by [`crate::guard()`].
//!   It converts infallibly: `ttlMs: 0` means "do not retain", so a record expires as
//!   soon as the clock moves past the write.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long a stored record stays eligible for replay: 24 hours.
pub const DEFAULT_TTL: Duration = Duration::from_millis(86_400_000);
/// How long an in-flight reservation blocks duplicates if its holder never finishes.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60);
/// Prefix of every cache key.
pub const DEFAULT_NAMESPACE: &str = "idem";

/// Errors produced while building a guard configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// Retention must be non-zero, otherwise nothing is ever replayed.
    #[error("ttl must be > 0")]
    ZeroTtl,
    /// A zero reservation would never block a concurrent duplicate.
    #[error("lock_ttl must be > 0")]
    ZeroLockTtl,
    #[error("namespace must not be empty")]
    EmptyNamespace,
}

/// Validated guard settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    ttl: Duration,
    lock_ttl: Duration,
    namespace: String,
}

impl GuardConfig {
    pub fn builder() -> GuardConfigBuilder {
        GuardConfigBuilder::new()
    }

    /// Retention window for stored records.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Lifetime of an in-flight reservation.
    ///
    /// A handler that runs longer than this loses its claim: once the pending slot
    /// expires, a duplicate request can reserve the key and run the handler a second
    /// time while the first is still going. Set it above the slowest expected handler.
    pub fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            lock_ttl: DEFAULT_LOCK_TTL,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

/// Builder for [`GuardConfig`].
#[derive(Debug, Clone)]
pub struct GuardConfigBuilder {
    ttl: Duration,
    lock_ttl: Duration,
    namespace: String,
}

impl GuardConfigBuilder {
    /// Create a builder with the defaults (24h retention, 60s reservations, `idem`).
    pub fn new() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            lock_ttl: DEFAULT_LOCK_TTL,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Retention in milliseconds, as the `ttlMs` option expresses it.
    pub fn ttl_ms(self, millis: u64) -> Self {
        self.ttl(Duration::from_millis(millis))
    }

    pub fn lock_ttl(mut self, lock_ttl: Duration) -> Self {
        self.lock_ttl = lock_ttl;
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Build the configuration, validating inputs.
    pub fn build(self) -> Result<GuardConfig, BuildError> {
        if self.ttl.is_zero() {
            return Err(BuildError::ZeroTtl);
        }
        if self.lock_ttl.is_zero() {
            return Err(BuildError::ZeroLockTtl);
        }
        if self.namespace.is_empty() {
            return Err(BuildError::EmptyNamespace);
        }
        Ok(GuardConfig { ttl: self.ttl, lock_ttl: self.lock_ttl, namespace: self.namespace })
    }
}

impl Default for GuardConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-call options: `{ "ttlMs": 3600000 }`. Missing fields take the defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

impl GuardOptions {
    pub fn ttl_ms(millis: u64) -> Self {
        Self { ttl_ms: Some(millis) }
    }
}

impl From<GuardOptions> for GuardConfig {
    /// Unlike the builder, a zero `ttlMs` is accepted and stores records with no
    /// retention.
    fn from(options: GuardOptions) -> Self {
        let mut config = GuardConfig::default();
        if let Some(millis) = options.ttl_ms {
            config.ttl = Duration::from_millis(millis);
        }
        config
    }
}
