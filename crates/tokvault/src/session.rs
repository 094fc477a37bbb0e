//! Session façade: binds one token to one store and lazily loads its data.
//!
//! A session loads from its store at most once; the first access (read or
//! mutation) resolves the data and caches it for the session's remaining
//! lifetime. A failed load is swallowed: the session keeps the data it was
//! constructed with and reports nothing from [`Session::data`]; callers
//! that care can inspect [`Session::load_error`]. This mirrors the store
//! contract's deliberate choice of "apparently-valid empty session" over an
//! error on the read path.
//!
//! One session belongs to one logical request/flow. All operations
//! serialize through a single lock that is intentionally held across the
//! store call, so two tasks sharing a remote-backed session would serialize
//! behind network latency; that is a simplicity/latency tradeoff, not a
//! bug, and sharing a session concurrently is not intended usage.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::trace;

use crate::data::{Roles, SessionData, Value};
use crate::error::{Error, Result};
use crate::store::SessionStore;
use crate::token::{TokenSource, default_source};

struct State {
    token: String,
    data: SessionData,
    loaded: bool,
    load_error: Option<Arc<Error>>,
}

/// A single session bound to a store and a token.
pub struct Session {
    store: Option<Arc<dyn SessionStore>>,
    tokens: Arc<dyn TokenSource>,
    state: Mutex<State>,
}

impl Session {
    /// Bind a session to a store. The token is taken from `data`; an empty
    /// token means a fresh session that will be minted on first save.
    pub fn new(store: Arc<dyn SessionStore>, data: SessionData) -> Self {
        Self {
            store: Some(store),
            tokens: default_source(),
            state: Mutex::new(State {
                token: data.token.clone(),
                data,
                loaded: false,
                load_error: None,
            }),
        }
    }

    /// Replace the token source used by [`Session::clear`].
    pub fn with_token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Current token. Changes after [`Session::clear`] or after a save that
    /// minted a token.
    pub async fn token(&self) -> String {
        self.state.lock().await.token.clone()
    }

    /// The session data, loading it from the store on first access.
    ///
    /// Never fails: a load error leaves the constructor-supplied data in
    /// place (see module docs) and is retrievable via
    /// [`Session::load_error`].
    pub async fn data(&self) -> SessionData {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await;
        state.data.clone()
    }

    /// The error from the lazy load, if the load failed.
    pub async fn load_error(&self) -> Option<Arc<Error>> {
        self.state.lock().await.load_error.clone()
    }

    /// Numeric identity.
    pub async fn id(&self) -> u64 {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await;
        state.data.id
    }

    /// Account name.
    pub async fn account(&self) -> String {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await;
        state.data.account.clone()
    }

    /// State flags.
    pub async fn state(&self) -> u16 {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await;
        state.data.state
    }

    /// Role sequence.
    pub async fn roles(&self) -> Roles {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await;
        state.data.roles.clone()
    }

    /// Role membership.
    pub async fn has_role(&self, role: &str) -> bool {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await;
        state.data.has_role(role)
    }

    /// Extension entry lookup.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await;
        state.data.get(key).cloned()
    }

    /// Set the numeric identity.
    pub async fn set_id(&self, id: u64) {
        self.mutate(|data| data.id = id).await;
    }

    /// Set the account name.
    pub async fn set_account(&self, account: impl Into<String>) {
        let account = account.into();
        self.mutate(|data| data.account = account).await;
    }

    /// Set the state flags.
    pub async fn set_state(&self, state: u16) {
        self.mutate(|data| data.state = state).await;
    }

    /// Replace the role sequence.
    pub async fn set_roles(&self, roles: impl Into<Roles>) {
        let roles = roles.into();
        self.mutate(|data| data.roles = roles).await;
    }

    /// Insert or replace an extension entry.
    pub async fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let (key, value) = (key.into(), value.into());
        self.mutate(|data| data.items.set(key, value)).await;
    }

    /// Remove one extension entry. Mutates only; call [`Session::save`] to
    /// persist.
    pub async fn remove(&self, key: &str) {
        self.mutate(|data| data.items.remove(key)).await;
    }

    /// Persist the session data with the store's default lifetime.
    pub async fn save(&self) -> Result<()> {
        self.save_inner(None).await
    }

    /// Persist the session data with an explicit lifetime override.
    pub async fn save_with_ttl(&self, ttl: Duration) -> Result<()> {
        self.save_inner(Some(ttl)).await
    }

    /// Drop the old token's record, mint a fresh token, and persist the
    /// reset data under it. The session becomes unloaded so the next access
    /// reads back through the store.
    pub async fn clear(&self) -> Result<()> {
        let store = self.bound_store()?;
        let mut state = self.state.lock().await;

        if !state.token.is_empty() {
            store.clear(&state.token).await?;
        }

        state.data.clear();
        state.token = state.data.regenerate(&*self.tokens);
        state.loaded = false;
        state.load_error = None;
        trace!(token = %state.token, "session cleared, token rotated");

        store.save(&mut state.data, None).await
    }

    async fn save_inner(&self, ttl: Option<Duration>) -> Result<()> {
        let store = self.bound_store()?;
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await;

        store.save(&mut state.data, ttl).await?;
        // Adopt the token when the store minted one.
        state.token = state.data.token.clone();
        Ok(())
    }

    async fn mutate(&self, f: impl FnOnce(&mut SessionData)) {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await;
        f(&mut state.data);
    }

    /// Resolve the lazy load. Runs the store fetch at most once per session
    /// instance; success and failure both latch `loaded`.
    async fn ensure_loaded(&self, state: &mut State) {
        if state.loaded {
            return;
        }

        if !state.token.is_empty() {
            if let Some(store) = &self.store {
                match store.get(&state.token).await {
                    Ok(data) => state.data = data,
                    Err(e) => {
                        trace!(token = %state.token, error = %e, "lazy load failed");
                        state.load_error = Some(Arc::new(e));
                    }
                }
            }
        }
        state.loaded = true;
    }

    fn bound_store(&self) -> Result<Arc<dyn SessionStore>> {
        self.store
            .clone()
            .ok_or_else(|| Error::Backend("session is not bound to a store".to_string()))
    }

    /// Rebind every mutable field; used by the pool on acquire.
    pub(crate) fn rebind(&mut self, store: Arc<dyn SessionStore>, data: SessionData) {
        self.store = Some(store);
        let state = self.state.get_mut();
        state.token = data.token.clone();
        state.data = data;
        state.loaded = false;
        state.load_error = None;
    }

    /// Reset every mutable field to neutral; used by the pool on release.
    pub(crate) fn unbind(&mut self) {
        self.store = None;
        let state = self.state.get_mut();
        state.token.clear();
        state.data = SessionData::default();
        state.loaded = false;
        state.load_error = None;
    }
}
