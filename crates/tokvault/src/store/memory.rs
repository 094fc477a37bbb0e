//! In-process memory backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;

use crate::data::SessionData;
use crate::error::{Error, Result};
use crate::store::{DEFAULT_MAX_AGE, SessionStore, effective_ttl};
use crate::token::{TokenSource, default_source};

struct Record {
    data: SessionData,
    /// `None` means the record never expires.
    expires_at: Option<Instant>,
}

impl Record {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Single-lock in-process map with lazy expiry.
///
/// Expired records are purged on the `get` that observes them, not by a
/// background task.
pub struct MemoryStore {
    records: RwLock<HashMap<String, Record>>,
    max_age: Option<Duration>,
    tokens: Arc<dyn TokenSource>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a memory store with the default 7-day max-age.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            max_age: Some(DEFAULT_MAX_AGE),
            tokens: default_source(),
        }
    }

    /// Set the default record lifetime.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Records without a per-save ttl never expire.
    pub fn without_max_age(mut self) -> Self {
        self.max_age = None;
        self
    }

    /// Replace the token source (deterministic tokens in tests).
    pub fn with_token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Number of live records, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn clear(&self, token: &str) -> Result<()> {
        self.records.write().remove(token);
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<SessionData> {
        // Optimistic read: fetch under the read lock and only upgrade to a
        // write lock when the hit turns out to be expired. Two readers can
        // both observe expiry and both delete; remove is idempotent.
        {
            let records = self.records.read();
            match records.get(token) {
                None => return Err(Error::NotFound),
                Some(record) if !record.is_expired(Instant::now()) => {
                    return Ok(record.data.clone());
                }
                Some(_) => {}
            }
        }

        trace!(token, "purging expired record");
        self.records.write().remove(token);
        Err(Error::Expired)
    }

    async fn save(&self, data: &mut SessionData, ttl: Option<Duration>) -> Result<()> {
        if data.token.is_empty() {
            data.regenerate(&*self.tokens);
        }

        // A lifetime too large for the clock degrades to "never expires".
        let expires_at =
            effective_ttl(ttl, self.max_age).and_then(|d| Instant::now().checked_add(d));
        let record = Record {
            data: data.clone(),
            expires_at,
        };
        self.records.write().insert(data.token.clone(), record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let store = MemoryStore::new();
        let mut data = SessionData::with_token("t1");
        data.account = "alice".to_string();

        store.save(&mut data, None).await.unwrap();
        let back = store.get("t1").await.unwrap();
        assert_eq!(back, data);
    }

    #[tokio::test]
    async fn missing_token_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(store.get("nope").await, Err(Error::NotFound)));
    }

    #[tokio::test]
    async fn empty_token_is_minted_on_save() {
        let store = MemoryStore::new()
            .with_token_source(Arc::new(crate::token::SequenceTokens::new("m-")));
        let mut data = SessionData::new();

        store.save(&mut data, None).await.unwrap();
        assert_eq!(data.token, "m-0");
        assert!(store.get("m-0").await.is_ok());
    }

    #[tokio::test]
    async fn expired_record_is_purged_then_not_found() {
        let store = MemoryStore::new();
        let mut data = SessionData::with_token("t1");
        store
            .save(&mut data, Some(Duration::from_millis(20)))
            .await
            .unwrap();

        sleep(Duration::from_millis(40)).await;

        assert!(matches!(store.get("t1").await, Err(Error::Expired)));
        assert!(matches!(store.get("t1").await, Err(Error::NotFound)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let store = MemoryStore::new();
        let mut data = SessionData::with_token("t1");
        store.save(&mut data, None).await.unwrap();

        store.clear("t1").await.unwrap();
        store.clear("t1").await.unwrap();
        store.clear("never-existed").await.unwrap();
        assert!(matches!(store.get("t1").await, Err(Error::NotFound)));
    }

    #[tokio::test]
    async fn save_overwrites_existing_record() {
        let store = MemoryStore::new();
        let mut first = SessionData::with_token("t1");
        first.id = 1;
        store.save(&mut first, None).await.unwrap();

        let mut second = SessionData::with_token("t1");
        second.id = 2;
        store.save(&mut second, None).await.unwrap();

        assert_eq!(store.get("t1").await.unwrap().id, 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn oversized_ttl_degrades_to_never_expires() {
        let store = MemoryStore::new();
        let mut data = SessionData::with_token("t1");
        store.save(&mut data, Some(Duration::MAX)).await.unwrap();

        assert!(store.get("t1").await.is_ok());
    }

    #[tokio::test]
    async fn without_max_age_never_expires() {
        let store = MemoryStore::new().without_max_age();
        let mut data = SessionData::with_token("t1");
        store.save(&mut data, None).await.unwrap();

        sleep(Duration::from_millis(30)).await;
        assert!(store.get("t1").await.is_ok());
    }
}
