//! Method classification, token extraction and cache key construction.

use crate::record::IDEMPOTENCY_KEY_HEADER;
use http::{HeaderMap, Method};
use std::fmt;

/// Methods whose requests are deduplicated. Everything else passes straight through.
pub const STATE_CHANGING_METHODS: [&str; 4] = ["POST", "PUT", "PATCH", "DELETE"];

/// Uppercased method name if the method is state-changing, compared case-insensitively.
pub fn state_changing(method: &Method) -> Option<&'static str> {
    STATE_CHANGING_METHODS.iter().copied().find(|m| m.eq_ignore_ascii_case(method.as_str()))
}

/// `true` for POST, PUT, PATCH and DELETE in any letter case.
pub fn is_state_changing(method: &Method) -> bool {
    state_changing(method).is_some()
}

/// A client-supplied idempotency token: trimmed and never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Trim surrounding whitespace; `None` if nothing is left.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Read the first `Idempotency-Key` header value. Values that are not visible text
    /// are treated as missing.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get(IDEMPOTENCY_KEY_HEADER)?;
        Self::parse(value.to_str().ok()?)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store key for one (method, token) pair: `<namespace>:<METHOD>:<token>`.
///
/// The method always comes from [`STATE_CHANGING_METHODS`], none of which contain `:`,
/// so the first two separators are unambiguous whatever the token holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(namespace: &str, method: &str, token: &IdempotencyKey) -> Self {
        Self(format!("{}:{}:{}", namespace, method.to_ascii_uppercase(), token.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn classifies_methods_case_insensitively() {
        assert!(is_state_changing(&Method::POST));
        assert!(is_state_changing(&Method::DELETE));
        assert_eq!(state_changing(&Method::from_bytes(b"patch").unwrap()), Some("PATCH"));
        assert!(!is_state_changing(&Method::GET));
        assert!(!is_state_changing(&Method::HEAD));
        assert!(!is_state_changing(&Method::OPTIONS));
        assert!(!is_state_changing(&Method::from_bytes(b"PURGE").unwrap()));
    }

    #[test]
    fn token_is_trimmed() {
        let key = IdempotencyKey::parse("  abc \t").unwrap();
        assert_eq!(key.as_str(), "abc");
    }

    #[test]
    fn blank_tokens_are_rejected() {
        assert!(IdempotencyKey::parse("").is_none());
        assert!(IdempotencyKey::parse("   ").is_none());
    }

    #[test]
    fn reads_token_from_headers() {
        let mut headers = HeaderMap::new();
        assert!(IdempotencyKey::from_headers(&headers).is_none());

        headers.insert("idempotency-key", HeaderValue::from_static(" k-1 "));
        assert_eq!(IdempotencyKey::from_headers(&headers).unwrap().as_str(), "k-1");
    }

    #[test]
    fn opaque_header_bytes_count_as_missing() {
        let mut headers = HeaderMap::new();
        headers.insert("idempotency-key", HeaderValue::from_bytes(&[0xfa, 0xfb]).unwrap());
        assert!(IdempotencyKey::from_headers(&headers).is_none());
    }

    #[test]
    fn cache_keys_separate_methods() {
        let token = IdempotencyKey::parse("abc").unwrap();
        let post = CacheKey::new("idem", "post", &token);
        let delete = CacheKey::new("idem", "DELETE", &token);
        assert_eq!(post.as_str(), "idem:POST:abc");
        assert_ne!(post, delete);
    }

    #[test]
    fn tokens_with_separators_do_not_collide_across_methods() {
        let a = CacheKey::new("idem", "PUT", &IdempotencyKey::parse("POST:x").unwrap());
        let b = CacheKey::new("idem", "POST", &IdempotencyKey::parse("x").unwrap());
        assert_ne!(a, b);
    }
}
