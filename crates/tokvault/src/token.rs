//! Token generation.
//!
//! Tokens are opaque string identifiers. Production code uses
//! [`SecureTokens`]; tests can inject [`SequenceTokens`] (or any other
//! [`TokenSource`]) to get deterministic tokens.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;

/// Source of new session tokens.
///
/// Uniqueness is probabilistic for the default source; no registry of
/// issued tokens is kept.
pub trait TokenSource: Send + Sync {
    /// Generate a fresh opaque token.
    fn generate(&self) -> String;
}

/// Default token source: 32 bytes from a cryptographically secure RNG,
/// URL-safe base64 without padding.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecureTokens;

impl TokenSource for SecureTokens {
    fn generate(&self) -> String {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

/// Deterministic token source for tests: `<prefix><counter>`.
#[derive(Debug, Default)]
pub struct SequenceTokens {
    prefix: String,
    counter: AtomicU64,
}

impl SequenceTokens {
    /// Create a sequence source with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl TokenSource for SequenceTokens {
    fn generate(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}{}", self.prefix, n)
    }
}

/// Shared default token source.
pub(crate) fn default_source() -> Arc<dyn TokenSource> {
    Arc::new(SecureTokens)
}
