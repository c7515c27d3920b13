use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};

use crate::session::Session;

/// Where sessions live between messages, keyed by user id.
///
/// The store holds data only; per-user exclusivity is enforced by
/// `SearchEngine`, which never has two operations in flight for one key.
pub trait SessionStore: Send + Sync {
    fn get(&self, user_id: &str) -> Result<Option<Session>>;
    fn put(&self, user_id: &str, session: Session) -> Result<()>;
    fn delete(&self, user_id: &str) -> Result<Option<Session>>;
}

/// Process-local store; contents are lost on restart.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, user_id: &str) -> Result<Option<Session>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| anyhow!("session store lock poisoned"))?;
        Ok(sessions.get(user_id).cloned())
    }

    fn put(&self, user_id: &str, session: Session) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| anyhow!("session store lock poisoned"))?;
        sessions.insert(user_id.to_string(), session);
        Ok(())
    }

    fn delete(&self, user_id: &str) -> Result<Option<Session>> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| anyhow!("session store lock poisoned"))?;
        Ok(sessions.remove(user_id))
    }
}
