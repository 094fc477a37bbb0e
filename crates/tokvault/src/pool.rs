//! Reuse arena for [`Session`] objects.
//!
//! Amortizes per-request session allocation under load. `release` consumes
//! the session by value, so use-after-release and double-release do not
//! compile; the only caller obligation left is to actually release sessions
//! they want reused.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::data::SessionData;
use crate::session::Session;
use crate::store::SessionStore;

/// Idle sessions kept by default.
pub const DEFAULT_MAX_IDLE: usize = 1024;

/// Concurrency-safe free-list of reusable sessions.
pub struct SessionPool {
    free: Mutex<Vec<Session>>,
    max_idle: usize,
}

impl Default for SessionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionPool {
    /// Create a pool holding at most [`DEFAULT_MAX_IDLE`] idle sessions.
    pub fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_idle: DEFAULT_MAX_IDLE,
        }
    }

    /// Cap the number of idle sessions kept for reuse. Released sessions
    /// beyond the cap are dropped.
    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Take a session from the free list (or allocate one) and bind it to
    /// `store` and `data`. Every mutable field is reset to the supplied
    /// values; nothing leaks from the previous use.
    pub fn acquire(&self, store: Arc<dyn SessionStore>, data: SessionData) -> Session {
        match self.free.lock().pop() {
            Some(mut session) => {
                session.rebind(store, data);
                session
            }
            None => Session::new(store, data),
        }
    }

    /// Clear a session's bindings and return it to the free list. Sessions
    /// constructed outside the pool may be released into it.
    pub fn release(&self, mut session: Session) {
        session.unbind();
        let mut free = self.free.lock();
        if free.len() < self.max_idle {
            free.push(session);
        }
    }

    /// Number of idle sessions currently pooled.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}
