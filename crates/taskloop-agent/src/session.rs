//! Session history seam. Touched only at task start (load) and finish (save).

use dashmap::DashMap;
use taskloop_core::{Result, SessionKey};
use taskloop_llm::LlmMessage;
use tracing::debug;

#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// History for a session; empty when the session is new.
    async fn load(&self, key: &SessionKey) -> Result<Vec<LlmMessage>>;
    async fn save(&self, key: &SessionKey, history: &[LlmMessage]) -> Result<()>;
}

/// In-memory session store.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<SessionKey, Vec<LlmMessage>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn remove(&self, key: &SessionKey) -> Option<Vec<LlmMessage>> {
        self.sessions.remove(key).map(|(_, v)| v)
    }

    pub fn list(&self) -> Vec<SessionKey> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, key: &SessionKey) -> Result<Vec<LlmMessage>> {
        Ok(self
            .sessions
            .get(key)
            .map(|h| h.clone())
            .unwrap_or_default())
    }

    async fn save(&self, key: &SessionKey, history: &[LlmMessage]) -> Result<()> {
        debug!(session = %key, messages = history.len(), "session saved");
        self.sessions.insert(key.clone(), history.to_vec());
        Ok(())
    }
}
