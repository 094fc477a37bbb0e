//! Storage backends for session data.
//!
//! Every backend implements [`SessionStore`]; any implementation is
//! substitutable behind the trait. Stores are shared by many sessions and
//! must be safe for concurrent use.
//!
//! Cancellation: the methods are futures, so dropping one (for example via
//! `tokio::time::timeout`) cancels the call. The in-process backends never
//! suspend mid-operation and effectively ignore cancellation; the redis
//! backend propagates it through its network awaits.

mod file;
mod memory;
mod redis;
mod sharded;

use std::time::Duration;

use async_trait::async_trait;

use crate::data::SessionData;
use crate::error::Result;

pub use file::{DEFAULT_FILE_PREFIX, FileStore};
pub use memory::MemoryStore;
pub use redis::{DEFAULT_KEY_PREFIX, RedisStore};
pub use sharded::{DEFAULT_SHARD_COUNT, ShardedMemoryStore};

/// Default record lifetime: 7 days.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Pluggable session storage keyed by opaque token.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Remove the record for `token`. Removing an absent token succeeds.
    async fn clear(&self, token: &str) -> Result<()>;

    /// Fetch the record for `token`.
    ///
    /// Returns [`crate::Error::NotFound`] when absent and
    /// [`crate::Error::Expired`] (purging the record) when lapsed.
    async fn get(&self, token: &str) -> Result<SessionData>;

    /// Persist `data`, overwriting any existing record for its token.
    ///
    /// When `data.token` is empty a fresh token is minted and written back
    /// through `data` so the caller can read it. Effective lifetime is the
    /// `ttl` override when positive, else the backend's default max-age when
    /// set, else the record never expires.
    async fn save(&self, data: &mut SessionData, ttl: Option<Duration>) -> Result<()>;
}

/// Resolve the effective lifetime from a per-call override and a backend
/// default. `None` means the record never expires.
pub(crate) fn effective_ttl(ttl: Option<Duration>, max_age: Option<Duration>) -> Option<Duration> {
    match ttl {
        Some(d) if !d.is_zero() => Some(d),
        _ => max_age.filter(|d| !d.is_zero()),
    }
}
