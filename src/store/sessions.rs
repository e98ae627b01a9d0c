//! Session store
//!
//! Resolves opaque session tokens to users. A stale or unknown token is
//! an absence, not an error.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::schema::User;

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, User>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a session token to a user
    pub fn insert(&self, token: &str, user: User) {
        self.sessions.write().insert(token.to_string(), user);
    }

    /// Resolve a token. `None` means no such session.
    pub fn resolve(&self, token: &str) -> Option<User> {
        self.sessions.read().get(token).cloned()
    }

    /// Drop a session, if present
    pub fn remove(&self, token: &str) {
        self.sessions.write().remove(token);
    }
}
