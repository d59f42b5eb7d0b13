//! Cached handler outcomes and the response headers the guard stamps on them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Request/response header carrying the client's idempotency token.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
/// Response header telling the client whether the result was replayed.
pub const IDEMPOTENCY_RESULT_HEADER: &str = "X-Idempotency-Result";

/// Response headers attached to a [`Record`]. An empty map means "no headers".
pub type Headers = BTreeMap<String, String>;

/// Whether a response came from a fresh handler run or from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The handler ran for this request and its result was stored.
    Created,
    /// A previously stored result was returned without running the handler.
    Replayed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Created => "created",
            Outcome::Replayed => "replayed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of executing a handler once: status, body and optional headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record<T> {
    pub status: u16,
    pub body: T,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: Headers,
}

impl<T> Record<T> {
    pub fn new(status: u16, body: T) -> Self {
        Self { status, body, headers: Headers::new() }
    }

    /// Add or replace a header, matching existing names case-insensitively.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert_header(name.into(), value.into());
        self
    }

    /// Look up a header by name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The guard's verdict, if this record went through the guard.
    pub fn outcome(&self) -> Option<Outcome> {
        match self.header(IDEMPOTENCY_RESULT_HEADER)? {
            "created" => Some(Outcome::Created),
            "replayed" => Some(Outcome::Replayed),
            _ => None,
        }
    }

    /// Ordered merge: the record's own headers first, then the two guard headers, which
    /// win over any same-named header already present.
    pub(crate) fn tagged(mut self, token: &str, outcome: Outcome) -> Self {
        self.insert_header(IDEMPOTENCY_KEY_HEADER.to_string(), token.to_string());
        self.insert_header(IDEMPOTENCY_RESULT_HEADER.to_string(), outcome.as_str().to_string());
        self
    }

    fn insert_header(&mut self, name: String, value: String) {
        self.headers.retain(|k, _| !k.eq_ignore_ascii_case(&name));
        self.headers.insert(name, value);
    }
}
