//! Registry of live sessions using slab allocation.
//!
//! The acceptor inserts every started session and removes it from the
//! session's close callback, so the registry always reflects what is
//! still open and is bounded by the connection cap.

use std::sync::Arc;

use slab::Slab;

use crate::runtime::session::Session;

/// Bounded set of live sessions with O(1) insert and remove.
pub struct SessionRegistry {
    sessions: Slab<Arc<Session>>,
    max_sessions: usize,
}

impl SessionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Slab::with_capacity(max_sessions.min(1024)),
            max_sessions,
        }
    }

    /// Insert a session, returning its slot key.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert(&mut self, session: Arc<Session>) -> Option<usize> {
        if self.sessions.len() >= self.max_sessions {
            return None;
        }
        Some(self.sessions.insert(session))
    }

    pub fn remove(&mut self, key: usize) -> Option<Arc<Session>> {
        self.sessions.try_remove(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_sessions
    }

    /// Remove every session, leaving the registry empty.
    pub fn drain(&mut self) -> Vec<Arc<Session>> {
        self.sessions.drain().collect()
    }
}
