//! Redis-backed remote store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::debug;

use crate::data::{Items, Roles, SessionData};
use crate::error::{Error, Result};
use crate::store::{DEFAULT_MAX_AGE, SessionStore, effective_ttl};
use crate::token::{TokenSource, default_source};

/// Default redis key prefix.
pub const DEFAULT_KEY_PREFIX: &str = "tokvault:session:";

const FIELD_TOKEN: &str = "token";
const FIELD_ID: &str = "id";
const FIELD_ACCOUNT: &str = "account";
const FIELD_STATE: &str = "state";
const FIELD_ROLES: &str = "roles";
const FIELD_ITEMS: &str = "items";

/// Remote store keeping one redis hash per token.
///
/// Scalar fields are stored as text; `roles` and `items` use their compact
/// binary encodings. Expiration is a key-level TTL, so a lapsed record
/// simply vanishes: reads after expiry report [`Error::NotFound`], never
/// [`Error::Expired`]. Redis also cannot distinguish an absent key from an
/// empty hash; both read as [`Error::NotFound`].
///
/// Cancellation and deadlines propagate through the async connection; a
/// timed-out call surfaces as [`Error::Backend`].
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
    max_age: Option<Duration>,
    tokens: Arc<dyn TokenSource>,
}

impl RedisStore {
    /// Create a store over an already-configured client. Connects (and
    /// thereby validates the server) eagerly.
    pub async fn new(client: redis::Client) -> Result<Self> {
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            max_age: Some(DEFAULT_MAX_AGE),
            tokens: default_source(),
        })
    }

    /// Convenience constructor from a `redis://` URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Self::new(client).await
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

    /// Override the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Replace the token source (deterministic tokens in tests).
    pub fn with_token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = tokens;
        self
    }

    fn key(&self, token: &str) -> String {
        format!("{}{}", self.prefix, token)
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn clear(&self, token: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.key(token)).await?;
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<SessionData> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, Vec<u8>> = conn.hgetall(self.key(token)).await?;

        if fields.is_empty() {
            return Err(Error::NotFound);
        }

        decode_fields(&fields)
    }

    async fn save(&self, data: &mut SessionData, ttl: Option<Duration>) -> Result<()> {
        if data.token.is_empty() {
            data.regenerate(&*self.tokens);
        }

        let key = self.key(&data.token);
        let roles = data.roles.to_bytes()?;
        let items = data.items.to_bytes()?;

        // One round trip: set every field, then the key-level TTL. Any
        // failure inside the pipeline is reported as a single save error.
        let mut pipe = redis::pipe();
        pipe.hset(&key, FIELD_TOKEN, &data.token)
            .ignore()
            .hset(&key, FIELD_ID, data.id)
            .ignore()
            .hset(&key, FIELD_ACCOUNT, &data.account)
            .ignore()
            .hset(&key, FIELD_STATE, data.state)
            .ignore()
            .hset(&key, FIELD_ROLES, roles)
            .ignore()
            .hset(&key, FIELD_ITEMS, items)
            .ignore();

        if let Some(lifetime) = effective_ttl(ttl, self.max_age) {
            pipe.expire(&key, expire_secs(lifetime)).ignore();
        }

        let mut conn = self.conn.clone();
        pipe.query_async::<()>(&mut conn).await?;
        debug!(key, "record saved");
        Ok(())
    }
}

/// Whole seconds for `EXPIRE`, clamped to the command's signed range.
/// Sub-second lifetimes round up so a positive ttl never means "delete now".
fn expire_secs(lifetime: Duration) -> i64 {
    i64::try_from(lifetime.as_secs().max(1)).unwrap_or(i64::MAX)
}

fn decode_fields(fields: &HashMap<String, Vec<u8>>) -> Result<SessionData> {
    let mut data = SessionData::new();
    data.token = text_field(fields, FIELD_TOKEN)?;
    data.account = text_field(fields, FIELD_ACCOUNT)?;
    data.id = numeric_field(fields, FIELD_ID)?;
    data.state = numeric_field(fields, FIELD_STATE)?;

    if let Some(buf) = fields.get(FIELD_ROLES) {
        data.roles = Roles::from_bytes(buf)?;
    }
    if let Some(buf) = fields.get(FIELD_ITEMS) {
        data.items = Items::from_bytes(buf)?;
    }
    Ok(data)
}

fn text_field(fields: &HashMap<String, Vec<u8>>, name: &str) -> Result<String> {
    match fields.get(name) {
        None => Ok(String::new()),
        Some(buf) => String::from_utf8(buf.clone())
            .map_err(|e| Error::Serialization(format!("field {name}: {e}"))),
    }
}

fn numeric_field<T>(fields: &HashMap<String, Vec<u8>>, name: &str) -> Result<T>
where
    T: std::str::FromStr + Default,
    T::Err: std::fmt::Display,
{
    match fields.get(name) {
        None => Ok(T::default()),
        Some(buf) => {
            let text = std::str::from_utf8(buf)
                .map_err(|e| Error::Serialization(format!("field {name}: {e}")))?;
            text.parse()
                .map_err(|e| Error::Serialization(format!("field {name}: {e}")))
        }
    }
}
