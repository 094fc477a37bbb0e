//! Hash-sharded memory backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::data::SessionData;
use crate::error::Result;
use crate::store::{MemoryStore, SessionStore};
use crate::token::{TokenSource, default_source};

/// Shard count used when the requested count is unusable.
pub const DEFAULT_SHARD_COUNT: usize = 16;

/// Fixed array of independent [`MemoryStore`] shards routed by token hash.
///
/// Removes the single write lock as the throughput bottleneck at the cost
/// of cross-shard guarantees: no atomicity, ordering, or snapshot
/// consistency between tokens living in different shards.
pub struct ShardedMemoryStore {
    shards: Vec<MemoryStore>,
    mask: u32,
    tokens: Arc<dyn TokenSource>,
}

impl ShardedMemoryStore {
    /// Create a sharded store. `shard_count` must be a power of two; a
    /// non-positive or non-power-of-two count falls back to
    /// [`DEFAULT_SHARD_COUNT`].
    pub fn new(shard_count: usize) -> Self {
        let count = if shard_count == 0 || !shard_count.is_power_of_two() {
            DEFAULT_SHARD_COUNT
        } else {
            shard_count
        };

        Self {
            shards: (0..count).map(|_| MemoryStore::new()).collect(),
            mask: (count - 1) as u32,
            tokens: default_source(),
        }
    }

    /// Set the default record lifetime on every shard.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.shards = self
            .shards
            .into_iter()
            .map(|shard| shard.with_max_age(max_age))
            .collect();
        self
    }

    /// Replace the token source (deterministic tokens in tests).
    pub fn with_token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Records per shard, for occupancy checks.
    pub fn shard_sizes(&self) -> Vec<usize> {
        self.shards.iter().map(MemoryStore::len).collect()
    }

    fn shard(&self, token: &str) -> &MemoryStore {
        let index = fnv1a32(token.as_bytes()) & self.mask;
        &self.shards[index as usize]
    }
}

/// FNV-1a 32-bit hash. Fast, non-cryptographic; only used to spread tokens
/// across shards.
fn fnv1a32(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[async_trait]
impl SessionStore for ShardedMemoryStore {
    async fn clear(&self, token: &str) -> Result<()> {
        self.shard(token).clear(token).await
    }

    async fn get(&self, token: &str) -> Result<SessionData> {
        self.shard(token).get(token).await
    }

    async fn save(&self, data: &mut SessionData, ttl: Option<Duration>) -> Result<()> {
        // Mint before routing so the record lands in the shard owning the
        // final token.
        if data.token.is_empty() {
            data.regenerate(&*self.tokens);
        }
        self.shard(&data.token).save(data, ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn bad_shard_counts_fall_back_to_default() {
        assert_eq!(ShardedMemoryStore::new(0).shard_count(), DEFAULT_SHARD_COUNT);
        assert_eq!(ShardedMemoryStore::new(3).shard_count(), DEFAULT_SHARD_COUNT);
        assert_eq!(ShardedMemoryStore::new(100).shard_count(), DEFAULT_SHARD_COUNT);
        assert_eq!(ShardedMemoryStore::new(8).shard_count(), 8);
        assert_eq!(ShardedMemoryStore::new(1).shard_count(), 1);
    }

    #[test]
    fn fnv1a32_matches_reference_vectors() {
        assert_eq!(fnv1a32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a32(b"foobar"), 0xbf9c_f968);
    }

    #[tokio::test]
    async fn operations_route_to_one_shard() {
        let store = ShardedMemoryStore::new(4);
        let mut data = SessionData::with_token("t1");
        data.id = 9;
        store.save(&mut data, None).await.unwrap();

        assert_eq!(store.get("t1").await.unwrap().id, 9);
        assert_eq!(store.shard_sizes().iter().sum::<usize>(), 1);

        store.clear("t1").await.unwrap();
        assert!(matches!(store.get("t1").await, Err(Error::NotFound)));
    }

    #[tokio::test]
    async fn minted_token_is_retrievable() {
        let store = ShardedMemoryStore::new(8)
            .with_token_source(Arc::new(crate::token::SequenceTokens::new("s-")));
        let mut data = SessionData::new();
        store.save(&mut data, None).await.unwrap();

        assert_eq!(data.token, "s-0");
        assert!(store.get("s-0").await.is_ok());
    }

    #[tokio::test]
    async fn tokens_spread_across_shards() {
        let store = ShardedMemoryStore::new(16);
        for i in 0..1600 {
            let mut data = SessionData::with_token(format!("token-{i}"));
            store.save(&mut data, None).await.unwrap();
        }

        let sizes = store.shard_sizes();
        let mean = 1600 / sizes.len();
        for (shard, size) in sizes.iter().enumerate() {
            assert!(
                *size <= mean * 2,
                "shard {shard} holds {size} records (mean {mean})"
            );
            assert!(*size > 0, "shard {shard} is empty");
        }
    }
}
