//! Token-keyed session store with interchangeable backends.
//!
//! This crate issues and resolves opaque session tokens to mutable
//! [`SessionData`] records with expiration, across four storage backends:
//!
//! - [`MemoryStore`]: single-lock in-process map with lazy expiry
//! - [`ShardedMemoryStore`]: hash-sharded memory stores for write-heavy load
//! - [`FileStore`]: durable file-per-token records
//! - [`RedisStore`]: remote hash-per-token records with key-level TTL
//!
//! On top of the [`SessionStore`] contract sit the [`Session`] façade,
//! which lazily loads and caches data from a store exactly once per
//! instance, and the [`SessionPool`], which amortizes session allocation.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tokvault::{MemoryStore, Session, SessionData};
//!
//! let store = Arc::new(MemoryStore::new());
//! let session = Session::new(store.clone(), SessionData::new());
//! session.set_id(7).await;
//! session.save().await?;
//!
//! let token = session.token().await;
//! let later = Session::new(store, SessionData::with_token(token));
//! assert_eq!(later.id().await, 7);
//! ```

mod data;
mod error;
mod pool;
mod session;
mod store;
mod token;

pub use data::{Items, Roles, SessionData, Value};
pub use error::{Error, Result};
pub use pool::{DEFAULT_MAX_IDLE, SessionPool};
pub use session::Session;
pub use store::{
    DEFAULT_FILE_PREFIX, DEFAULT_KEY_PREFIX, DEFAULT_MAX_AGE, DEFAULT_SHARD_COUNT, FileStore,
    MemoryStore, RedisStore, SessionStore, ShardedMemoryStore,
};
pub use token::{SecureTokens, SequenceTokens, TokenSource};
